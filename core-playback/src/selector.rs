//! # Combo Selector
//!
//! Deterministic search over (source × transport) pairs.
//!
//! ## Algorithm
//!
//! 1. Build the source list: the forced source, the sources matching the
//!    forced MIME type, or the whole catalog (already sorted).
//! 2. Build the transport list: the forced transport, or every registered
//!    transport by priority ascending, then stably re-ordered by the caller's
//!    sort keys.
//! 3. Nest the two lists (sources outside by default) and return the first
//!    pair whose transport accepts the source's MIME type and reports the
//!    environment as supported.
//!
//! ## Resuming
//!
//! Passing the previous [`Combo`]'s [`ResumeCursor`] makes the search walk the
//! same order but skip every pair up to and including the marked one, so a
//! retry always means "the next untried pair".

use crate::catalog::{Source, SourceCatalog};
use crate::registry::{BrowserSupport, RegisteredTransport, TransportRegistry};
use core_runtime::config::{IterationOrder, SelectionSettings, TransportField, TransportSortKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

/// Scoring callback for [`SortKey::Score`]. Lower scores sort first.
pub type ScoreFn = Arc<dyn Fn(&RegisteredTransport) -> f64 + Send + Sync>;

/// One transport ordering criterion.
#[derive(Clone)]
pub enum SortKey {
    Field {
        field: TransportField,
        descending: bool,
    },
    /// Explicit ranking by short name; unlisted transports sort last.
    Rank(Vec<String>),
    Score(ScoreFn),
}

impl SortKey {
    fn compare(&self, a: &RegisteredTransport, b: &RegisteredTransport) -> Ordering {
        match self {
            SortKey::Field { field, descending } => {
                let ordering = match field {
                    TransportField::Priority => a.priority().cmp(&b.priority()),
                    TransportField::ShortName => a.short_name().cmp(b.short_name()),
                    TransportField::DisplayName => a.display_name().cmp(b.display_name()),
                };
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
            SortKey::Rank(order) => {
                let rank = |t: &RegisteredTransport| {
                    order
                        .iter()
                        .position(|name| name == t.short_name())
                        .unwrap_or(usize::MAX)
                };
                rank(a).cmp(&rank(b))
            }
            SortKey::Score(score) => score(a)
                .partial_cmp(&score(b))
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl From<&TransportSortKey> for SortKey {
    fn from(key: &TransportSortKey) -> Self {
        match key {
            TransportSortKey::Field { field, descending } => SortKey::Field {
                field: *field,
                descending: *descending,
            },
            TransportSortKey::Rank { order } => SortKey::Rank(order.clone()),
        }
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Field { field, descending } => f
                .debug_struct("Field")
                .field("field", field)
                .field("descending", descending)
                .finish(),
            SortKey::Rank(order) => f.debug_tuple("Rank").field(order).finish(),
            SortKey::Score(_) => f.write_str("Score(..)"),
        }
    }
}

/// Marks the pair a previous search returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCursor {
    pub transport: String,
    pub source_index: usize,
}

/// Inputs of one selector invocation besides the catalog and registry.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub force_source: Option<usize>,
    pub force_type: Option<String>,
    pub force_transport: Option<String>,
    pub sort_keys: Vec<SortKey>,
    pub iteration: IterationOrder,
    pub resume: Option<ResumeCursor>,
}

impl SelectOptions {
    pub fn from_settings(settings: &SelectionSettings) -> Self {
        Self {
            force_source: settings.force_source,
            force_type: settings.force_type.clone(),
            force_transport: settings.force_transport.clone(),
            sort_keys: settings.sort_transports.iter().map(SortKey::from).collect(),
            iteration: settings.iteration,
            resume: None,
        }
    }

    pub fn resume_after(mut self, cursor: ResumeCursor) -> Self {
        self.resume = Some(cursor);
        self
    }

    pub fn with_sort_key(mut self, key: SortKey) -> Self {
        self.sort_keys.push(key);
        self
    }
}

/// A (transport, source) pairing chosen by the selector.
#[derive(Debug, Clone)]
pub struct Combo {
    pub transport: RegisteredTransport,
    pub source: Source,
    pub source_index: usize,
    /// What the transport's environment check returned.
    pub support: BrowserSupport,
}

impl Combo {
    pub fn resume_cursor(&self) -> ResumeCursor {
        ResumeCursor {
            transport: self.transport.short_name().to_string(),
            source_index: self.source_index,
        }
    }

    /// Whether the pair is the one `other` marks.
    pub fn same_pair(&self, other: &Combo) -> bool {
        self.resume_cursor() == other.resume_cursor()
    }
}

fn candidate_sources<'a>(catalog: &'a SourceCatalog, options: &SelectOptions) -> Vec<&'a Source> {
    if let Some(index) = options.force_source {
        return catalog.get(index).into_iter().collect();
    }

    match options.force_type.as_deref() {
        Some(mime) => catalog
            .sources()
            .iter()
            .filter(|source| source.mime_type == mime)
            .collect(),
        None => catalog.sources().iter().collect(),
    }
}

fn candidate_transports<'a>(
    registry: &'a TransportRegistry,
    options: &SelectOptions,
) -> Vec<&'a RegisteredTransport> {
    if let Some(name) = options.force_transport.as_deref() {
        return registry.get(name).into_iter().collect();
    }

    let mut transports = registry.by_priority();
    if !options.sort_keys.is_empty() {
        transports.sort_by(|a, b| {
            options
                .sort_keys
                .iter()
                .map(|key| key.compare(a, b))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
    transports
}

fn try_pair(
    transport: &RegisteredTransport,
    source: &Source,
    catalog: &SourceCatalog,
) -> Option<Combo> {
    let descriptor = transport.descriptor();
    if !descriptor.is_mime_supported(&source.mime_type) {
        trace!(transport = transport.short_name(), mime = %source.mime_type, "MIME type not supported");
        return None;
    }

    let support = descriptor.is_browser_supported(&source.mime_type, source, catalog);
    if !support.is_supported() {
        debug!(
            transport = transport.short_name(),
            source_index = source.index,
            "Environment cannot play source"
        );
        return None;
    }

    Some(Combo {
        transport: transport.clone(),
        source: source.clone(),
        source_index: source.index,
        support,
    })
}

/// Find the first viable pair, continuing after `options.resume` if set.
#[instrument(skip_all, fields(sources = catalog.len(), transports = registry.len()))]
pub fn select_combo(
    catalog: &SourceCatalog,
    registry: &TransportRegistry,
    options: &SelectOptions,
) -> Option<Combo> {
    let sources = candidate_sources(catalog, options);
    let transports = candidate_transports(registry, options);

    let cursor = options.resume.as_ref();
    let is_marked_source =
        |source: &&Source| cursor.is_some_and(|c| c.source_index == source.index);
    let is_marked_transport =
        |transport: &&RegisteredTransport| cursor.is_some_and(|c| c.transport == transport.short_name());

    let combo = match options.iteration {
        IterationOrder::SourceFirst => search(
            &sources,
            &transports,
            cursor.is_some(),
            is_marked_source,
            is_marked_transport,
            |source, transport| try_pair(transport, source, catalog),
        ),
        IterationOrder::TransportFirst => search(
            &transports,
            &sources,
            cursor.is_some(),
            is_marked_transport,
            is_marked_source,
            |transport, source| try_pair(transport, source, catalog),
        ),
    };

    match &combo {
        Some(combo) => info!(
            transport = combo.transport.short_name(),
            source_index = combo.source_index,
            mime = %combo.source.mime_type,
            "Selected combo"
        ),
        None => info!(resumed = options.resume.is_some(), "No compatible combo"),
    }

    combo
}

/// Nested search with resume fast-forward.
///
/// Until the marker's outer item is reached, outer items are skipped whole.
/// Within the marker's outer item, inner items up to and including the marker
/// are skipped. Every later outer item is tested in full. A marker whose outer
/// item exists without its inner item ends the search.
fn search<O, I, FO, FI, T>(
    outer: &[O],
    inner: &[I],
    resuming: bool,
    is_marked_outer: FO,
    is_marked_inner: FI,
    mut test: T,
) -> Option<Combo>
where
    FO: Fn(&O) -> bool,
    FI: Fn(&I) -> bool,
    T: FnMut(&O, &I) -> Option<Combo>,
{
    let mut outer_started = !resuming;

    for o in outer {
        let mut inner_started = true;
        if !outer_started {
            if !is_marked_outer(o) {
                continue;
            }
            outer_started = true;
            inner_started = false;
        }

        for i in inner {
            if !inner_started {
                inner_started = is_marked_inner(i);
                continue;
            }

            if let Some(combo) = test(o, i) {
                return Some(combo);
            }
        }

        if !inner_started {
            // Marked outer item without its marked inner item.
            return None;
        }
    }

    None
}
