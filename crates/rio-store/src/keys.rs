//! Namespaced keys for values kept in the store.
//!
//! Every key is `<namespace>:<name>` so unrelated callers sharing one store
//! never collide.

/// Namespace for everything written by the platform session.
pub const NAMESPACE: &str = "rapyutaio";

/// Key holding the cached bearer credential.
pub const CREDENTIAL: &str = "rapyutaio:credential";

/// Build a key inside the platform namespace.
#[must_use]
pub fn namespaced(name: &str) -> String {
    format!("{NAMESPACE}:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_key_is_namespaced() {
        assert_eq!(namespaced("credential"), CREDENTIAL);
        assert!(CREDENTIAL.starts_with(NAMESPACE));
    }
}
