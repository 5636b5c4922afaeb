/// Continuation cursor handed to each chain step.
///
/// The dispatcher owns one cursor per step and inspects it after the step
/// returns: one [`proceed`](Next::proceed) advances the chain, none stops it,
/// more than one is a double continuation.
#[derive(Debug, Default)]
pub struct Next {
    calls: u32,
}

impl Next {
    pub fn proceed(&mut self) {
        self.calls = self.calls.saturating_add(1);
    }

    pub fn called(&self) -> bool {
        self.calls > 0
    }

    pub(crate) fn verdict(&self) -> Verdict {
        match self.calls {
            0 => Verdict::Stop,
            1 => Verdict::Advance,
            _ => Verdict::Repeated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Advance,
    Stop,
    Repeated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_follows_call_count() {
        let mut next = Next::default();
        assert_eq!(next.verdict(), Verdict::Stop);
        assert!(!next.called());
        next.proceed();
        assert_eq!(next.verdict(), Verdict::Advance);
        next.proceed();
        assert_eq!(next.verdict(), Verdict::Repeated);
        assert!(next.called());
    }
}
