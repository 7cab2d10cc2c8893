//! # ACL Hook
//!
//! The server consults an `AclCheck` before dispatching each command; the
//! verdict is honoured but the policy itself lives with the caller. The
//! default policy allows everything.

/// Authorization verdict provider consulted before dispatch.
pub trait AclCheck: Send + Sync {
    /// Returns whether `user` may run `command` against `keys`.
    fn check(&self, user: &str, command: &str, keys: &[String]) -> bool;
}

/// Default policy: every command is allowed.
pub struct AllowAll;

impl AclCheck for AllowAll {
    fn check(&self, _user: &str, _command: &str, _keys: &[String]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyWrites;

    impl AclCheck for DenyWrites {
        fn check(&self, _user: &str, command: &str, _keys: &[String]) -> bool {
            !matches!(command, "SET" | "DEL")
        }
    }

    #[test]
    fn custom_policies_plug_in() {
        let acl = DenyWrites;
        assert!(acl.check("default", "GET", &[]));
        assert!(!acl.check("default", "SET", &[]));
        assert!(AllowAll.check("default", "SET", &[]));
    }
}
