use qvault_types::models::Viewer;

/// Source of the signed-in user. `None` means sign-in has not settled.
pub trait IdentityProvider {
    fn current_user(&self) -> Option<Viewer>;
}
