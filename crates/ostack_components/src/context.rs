//! Options shared by every builder call.

use crate::naming::BaseContext;

/// Naming context plus the provider every resource is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentContext {
    pub base: BaseContext,
    pub provider: Option<String>,
}

impl ComponentContext {
    pub fn new(base: BaseContext) -> Self {
        Self {
            base,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }
}
