use std::sync::Arc;

use crate::config::local::LocalConfiguration;
use crate::utils::datetime::{Clock, SystemClock};

/// Construction options for [`super::ConfigurationClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Key filters such as `DemoApp:*`; empty selects every key
    pub filters: Vec<String>,
    /// Label applied to every selector; `None` selects the null label
    pub label: Option<String>,
    /// Start in disabled mode when the uri is missing, and tolerate an
    /// unreachable store at startup
    pub optional: bool,
    /// Overrides the tenant found in the environment
    pub tenant_id: Option<String>,
    pub local: LocalConfiguration,
    pub clock: Arc<dyn Clock>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            label: None,
            optional: false,
            tenant_id: None,
            local: LocalConfiguration::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_tenant_id<S: Into<String>>(mut self, tenant_id: S) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_local(mut self, local: LocalConfiguration) -> Self {
        self.local = local;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
