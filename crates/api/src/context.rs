/// Culture negotiated for the current request (e.g. `fa-IR`).
///
/// Inserted into request extensions by the localization middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCulture(String);

impl RequestCulture {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}
