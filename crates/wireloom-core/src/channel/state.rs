use crate::error::{Error, Result};

/// Channel lifecycle states (§4.1). Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Opening,
    Active,
    Closing,
    Error,
    Destroy,
}

impl State {
    /// Validates a transition against the allowed set in §4.1:
    ///
    /// ```text
    /// Closed  -> Opening
    /// Opening -> Active | Error
    /// Active  -> Closing | Error
    /// Closing -> Closed | Error
    /// Error   -> Closed | Destroy
    /// any     -> Destroy
    /// ```
    pub fn validate_transition(from: State, to: State) -> Result<()> {
        use State::*;
        let ok = match (from, to) {
            (_, Destroy) => true,
            (Closed, Opening) => true,
            (Opening, Active) | (Opening, Error) => true,
            (Active, Closing) | (Active, Error) => true,
            (Closing, Closed) | (Closing, Error) => true,
            (Error, Closed) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: "a valid successor of the current state",
                found: from,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use State::*;

    #[test]
    fn allowed_transitions_pass() {
        for (a, b) in [
            (Closed, Opening),
            (Opening, Active),
            (Opening, Error),
            (Active, Closing),
            (Active, Error),
            (Closing, Closed),
            (Closing, Error),
            (Error, Closed),
            (Active, Destroy),
            (Closed, Destroy),
        ] {
            assert!(State::validate_transition(a, b).is_ok(), "{a:?} -> {b:?}");
        }
    }

    #[test]
    fn disallowed_transitions_fail() {
        for (a, b) in [
            (Closed, Active),
            (Opening, Closing),
            (Active, Opening),
            (Closed, Closing),
            (Closing, Opening),
            (Error, Active),
        ] {
            assert!(State::validate_transition(a, b).is_err(), "{a:?} -> {b:?}");
        }
    }
}
