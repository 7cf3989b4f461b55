//! Exemption from scheduling.
//!
//! Exempt requests skip estimation, queuing and seat accounting and run
//! immediately.

/// Decides whether a request bypasses scheduling.
pub trait Exemption<Req: ?Sized>: Send + Sync {
    /// Returns whether `request` is exempt.
    fn is_exempt(&self, request: &Req) -> bool;
}

/// Exempts nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExemption;

impl<Req: ?Sized> Exemption<Req> for NoExemption {
    fn is_exempt(&self, _request: &Req) -> bool {
        false
    }
}

impl<Req: ?Sized, F> Exemption<Req> for F
where
    F: Fn(&Req) -> bool + Send + Sync,
{
    fn is_exempt(&self, request: &Req) -> bool {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_exemption() {
        assert!(!Exemption::<str>::is_exempt(&NoExemption, "/healthz"));
    }

    #[test]
    fn test_closure_exemption() {
        let health_checks = |path: &str| path == "/healthz";
        assert!(health_checks.is_exempt("/healthz"));
        assert!(!health_checks.is_exempt("/api"));
    }
}
