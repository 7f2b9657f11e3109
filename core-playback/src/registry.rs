//! # Transport Registry
//!
//! Explicit, caller-owned set of transport implementations the selector may
//! pair with sources. Hosts build one registry at startup and register each
//! transport they ship; nothing is registered implicitly.

use crate::catalog::{Source, SourceCatalog};
use crate::error::{PlaybackError, Result};
use bridge_traits::platform::PlatformSendSync;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Result of a transport's environment check for one source.
///
/// The selector only cares whether the result is truthy; callers holding the
/// chosen combo may inspect the playable track kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserSupport {
    Unsupported,
    Supported,
    /// Supported, limited to these track kinds (e.g. `["video", "audio"]`).
    Tracks(Vec<String>),
}

impl BrowserSupport {
    pub fn is_supported(&self) -> bool {
        match self {
            BrowserSupport::Unsupported => false,
            BrowserSupport::Supported => true,
            BrowserSupport::Tracks(tracks) => !tracks.is_empty(),
        }
    }

    pub fn tracks(&self) -> Option<&[String]> {
        match self {
            BrowserSupport::Tracks(tracks) => Some(tracks),
            _ => None,
        }
    }
}

impl From<bool> for BrowserSupport {
    fn from(supported: bool) -> Self {
        if supported {
            BrowserSupport::Supported
        } else {
            BrowserSupport::Unsupported
        }
    }
}

/// Capability description of one delivery protocol implementation.
pub trait TransportDescriptor: PlatformSendSync {
    /// Registry key, e.g. `"mews"` or `"hlsjs"`.
    fn short_name(&self) -> &str;

    fn display_name(&self) -> &str;

    /// MIME types this transport can consume.
    fn mime_list(&self) -> &[String];

    fn is_mime_supported(&self, mime: &str) -> bool {
        self.mime_list().iter().any(|m| m == mime)
    }

    /// Whether the host environment can play `source` through this transport.
    fn is_browser_supported(
        &self,
        mime: &str,
        source: &Source,
        catalog: &SourceCatalog,
    ) -> BrowserSupport;

    /// Transports that hold only a small buffer use the stricter health
    /// threshold.
    fn latency_intolerant(&self) -> bool {
        false
    }
}

/// A registered transport together with its effective priority.
#[derive(Clone)]
pub struct RegisteredTransport {
    descriptor: Arc<dyn TransportDescriptor>,
    priority: i32,
}

impl RegisteredTransport {
    pub fn descriptor(&self) -> &Arc<dyn TransportDescriptor> {
        &self.descriptor
    }

    pub fn short_name(&self) -> &str {
        self.descriptor.short_name()
    }

    pub fn display_name(&self) -> &str {
        self.descriptor.display_name()
    }

    /// Lower values are tried first.
    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl fmt::Debug for RegisteredTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTransport")
            .field("short_name", &self.short_name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Transport registry keyed by short name.
#[derive(Debug, Clone, Default)]
pub struct TransportRegistry {
    transports: Vec<RegisteredTransport>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport with priority equal to its registration order.
    pub fn register(&mut self, descriptor: Arc<dyn TransportDescriptor>) -> Result<()> {
        let priority = self.transports.len() as i32;
        self.register_with_priority(descriptor, priority)
    }

    pub fn register_with_priority(
        &mut self,
        descriptor: Arc<dyn TransportDescriptor>,
        priority: i32,
    ) -> Result<()> {
        let name = descriptor.short_name();
        if self.get(name).is_some() {
            return Err(PlaybackError::InvalidState(format!(
                "transport '{}' is already registered",
                name
            )));
        }

        debug!(transport = name, priority, "Registered transport");
        self.transports.push(RegisteredTransport {
            descriptor,
            priority,
        });
        Ok(())
    }

    pub fn get(&self, short_name: &str) -> Option<&RegisteredTransport> {
        self.transports
            .iter()
            .find(|transport| transport.short_name() == short_name)
    }

    /// Transports in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTransport> {
        self.transports.iter()
    }

    /// Transports ordered by priority ascending; equal priorities keep
    /// registration order.
    pub fn by_priority(&self) -> Vec<&RegisteredTransport> {
        let mut ordered: Vec<_> = self.transports.iter().collect();
        ordered.sort_by_key(|transport| transport.priority);
        ordered
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

type SupportFn = dyn Fn(&str, &Source, &SourceCatalog) -> BrowserSupport + Send + Sync;

/// Table-driven descriptor for transports whose environment check is a plain
/// function.
pub struct StaticTransport {
    short_name: String,
    display_name: String,
    mimes: Vec<String>,
    latency_intolerant: bool,
    support: Box<SupportFn>,
}

impl StaticTransport {
    /// A transport that reports every MIME type in `mimes` as playable.
    pub fn new<I, S>(short_name: impl Into<String>, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let short_name = short_name.into();
        Self {
            display_name: short_name.clone(),
            short_name,
            mimes: mimes.into_iter().map(Into::into).collect(),
            latency_intolerant: false,
            support: Box::new(|_, _, _| BrowserSupport::Supported),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn latency_intolerant(mut self, intolerant: bool) -> Self {
        self.latency_intolerant = intolerant;
        self
    }

    pub fn with_support<F>(mut self, support: F) -> Self
    where
        F: Fn(&str, &Source, &SourceCatalog) -> BrowserSupport + Send + Sync + 'static,
    {
        self.support = Box::new(support);
        self
    }
}

impl TransportDescriptor for StaticTransport {
    fn short_name(&self) -> &str {
        &self.short_name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn mime_list(&self) -> &[String] {
        &self.mimes
    }

    fn is_browser_supported(
        &self,
        mime: &str,
        source: &Source,
        catalog: &SourceCatalog,
    ) -> BrowserSupport {
        (self.support)(mime, source, catalog)
    }

    fn latency_intolerant(&self) -> bool {
        self.latency_intolerant
    }
}
