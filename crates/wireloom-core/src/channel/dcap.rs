bitflags::bitflags! {
    /// Dynamic capabilities (§4.1). Scheduling hints the event loop reads on
    /// every step; changed freely over the channel's lifetime.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dcaps: u8 {
        const POLLIN            = 0b0000_0001;
        const POLLOUT           = 0b0000_0010;
        const PROCESS           = 0b0000_0100;
        const PENDING           = 0b0000_1000;
        const SUSPEND           = 0b0001_0000;
        const SUSPEND_PERMANENT = 0b0010_0000;
    }
}

impl Dcaps {
    /// `need_process = (dcaps & (PROCESS|SUSPEND)) == PROCESS` (§4.1, §8).
    pub fn need_process(self) -> bool {
        (self & (Dcaps::PROCESS | Dcaps::SUSPEND)) == Dcaps::PROCESS
    }

    pub fn suspended(self) -> bool {
        self.intersects(Dcaps::SUSPEND | Dcaps::SUSPEND_PERMANENT)
    }
}

/// Payload of a `ChannelUpdate` meta-message: the dcaps value *before* the
/// change, so the loop can diff and re-arm only what moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynCap {
    pub old: Dcaps,
    pub new: Dcaps,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_process_matches_invariant() {
        for bits in 0u8..=0b0011_1111 {
            let d = Dcaps::from_bits_truncate(bits);
            let expected = (d & (Dcaps::PROCESS | Dcaps::SUSPEND)) == Dcaps::PROCESS;
            assert_eq!(d.need_process(), expected);
        }
    }

    #[test]
    fn suspend_masks_without_clearing_process() {
        let d = Dcaps::PROCESS | Dcaps::SUSPEND;
        assert!(d.contains(Dcaps::PROCESS));
        assert!(!d.need_process());
    }
}
