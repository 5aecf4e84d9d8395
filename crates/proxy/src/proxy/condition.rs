use crate::session::Session;

/// A verdict computed on the session state, provided by the condition engine.
#[cfg_attr(test, mockall::automock)]
pub trait Condition: Send + Sync {
    fn eval(&self, session: &Session) -> bool;
}

/// How a condition result is turned into a rule verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CondPolicy {
    #[default]
    If,
    Unless,
}

/// A condition with its `if`/`unless` policy.
pub struct Conditional {
    pub policy: CondPolicy,
    pub cond: Box<dyn Condition>,
}

impl Conditional {
    pub fn new(policy: CondPolicy, cond: Box<dyn Condition>) -> Self {
        Self { policy, cond }
    }

    /// Returns `true` when the rule owning this condition applies.
    pub fn pass(&self, session: &Session) -> bool {
        let verdict = self.cond.eval(session);
        match self.policy {
            CondPolicy::If => verdict,
            CondPolicy::Unless => !verdict,
        }
    }
}

impl std::fmt::Debug for Conditional {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conditional").field("policy", &self.policy).finish_non_exhaustive()
    }
}

/// Returns `true` if any of `conds` applies.
pub(crate) fn any_pass(conds: &[Conditional], session: &Session) -> bool {
    conds.iter().any(|c| c.pass(session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Proxy;
    use std::time::Instant;
    use triomphe::Arc;

    fn session() -> Session {
        Session::new(1, Arc::new(Proxy::new("fe")), "127.0.0.1:1000".parse().unwrap(), Instant::now())
    }

    fn mock(verdict: bool) -> Box<dyn Condition> {
        let mut cond = MockCondition::new();
        cond.expect_eval().return_const(verdict);
        Box::new(cond)
    }

    #[test]
    fn test_policy() {
        let s = session();
        assert!(Conditional::new(CondPolicy::If, mock(true)).pass(&s));
        assert!(!Conditional::new(CondPolicy::Unless, mock(true)).pass(&s));
        assert!(Conditional::new(CondPolicy::Unless, mock(false)).pass(&s));
    }

    #[test]
    fn test_any_pass() {
        let s = session();
        assert!(!any_pass(&[], &s));
        let conds = vec![Conditional::new(CondPolicy::If, mock(false)), Conditional::new(CondPolicy::If, mock(true))];
        assert!(any_pass(&conds, &s));
    }
}
