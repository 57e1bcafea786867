//! Guarded transitions over a closed set of states.
//!
//! Each entity type declares one allow-list as a `static`: every non-terminal
//! state maps to the states reachable from it in one step. A state with no
//! row in the table is terminal.

use std::fmt;

/// A rejected `from -> to` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("can't transition from {from} to {to}")]
pub struct InvalidTransition<S: fmt::Display + fmt::Debug> {
    pub from: S,
    pub to: S,
}

pub struct StateMachine<S: 'static> {
    edges: &'static [(S, &'static [S])],
}

impl<S> StateMachine<S>
where
    S: Copy + PartialEq + fmt::Display + fmt::Debug + 'static,
{
    pub const fn new(edges: &'static [(S, &'static [S])]) -> Self {
        Self { edges }
    }

    /// One-step targets of `state`. Empty for terminal states.
    pub fn targets(&self, state: S) -> &'static [S] {
        self.edges
            .iter()
            .find(|(from, _)| *from == state)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    pub fn can_transition(&self, current: S, target: S) -> bool {
        self.targets(current).contains(&target)
    }

    pub fn is_terminal(&self, state: S) -> bool {
        self.targets(state).is_empty()
    }

    /// Returns `target` when the edge exists. Performs no I/O.
    pub fn transition(&self, current: S, target: S) -> Result<S, InvalidTransition<S>> {
        if self.can_transition(current, target) {
            Ok(target)
        } else {
            Err(InvalidTransition { from: current, to: target })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Yellow,
        Off,
    }

    impl fmt::Display for Light {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    const EDGES: &[(Light, &[Light])] = &[
        (Light::Red, &[Light::Green, Light::Off]),
        (Light::Green, &[Light::Yellow]),
        (Light::Yellow, &[Light::Red]),
    ];

    static LIGHT: StateMachine<Light> = StateMachine::new(EDGES);

    #[test]
    fn follows_table() {
        assert!(LIGHT.can_transition(Light::Red, Light::Green));
        assert!(LIGHT.can_transition(Light::Red, Light::Off));
        assert!(!LIGHT.can_transition(Light::Red, Light::Yellow));
        assert!(!LIGHT.can_transition(Light::Green, Light::Green));
    }

    #[test]
    fn absent_state_is_terminal() {
        assert!(LIGHT.is_terminal(Light::Off));
        assert!(LIGHT.targets(Light::Off).is_empty());
        for target in [Light::Red, Light::Green, Light::Yellow, Light::Off] {
            assert!(!LIGHT.can_transition(Light::Off, target));
        }
    }

    #[test]
    fn transition_reports_both_ends() {
        assert_eq!(LIGHT.transition(Light::Green, Light::Yellow), Ok(Light::Yellow));
        let err = LIGHT.transition(Light::Green, Light::Red).unwrap_err();
        assert_eq!(err, InvalidTransition { from: Light::Green, to: Light::Red });
        assert_eq!(err.to_string(), "can't transition from Green to Red");
    }
}
