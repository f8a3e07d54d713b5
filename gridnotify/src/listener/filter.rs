//! Event filters, converters and the per-registration pipeline that applies them.

use std::sync::Arc;

use gridnotify_core::Result;

use crate::event::CacheEvent;

/// Decides whether an entry event reaches a listener.
pub trait CacheEventFilter<K, V>: Send + Sync {
    /// Returns `true` to deliver the event.
    fn accept(&self, event: &CacheEvent<K, V>) -> Result<bool>;

    /// Names the indexing provider able to pre-evaluate this filter, if any.
    fn indexing_kind(&self) -> Option<&str> {
        None
    }
}

impl<K, V, F> CacheEventFilter<K, V> for F
where
    F: Fn(&CacheEvent<K, V>) -> Result<bool> + Send + Sync,
{
    fn accept(&self, event: &CacheEvent<K, V>) -> Result<bool> {
        self(event)
    }
}

/// Replaces the value carried by an entry event.
pub trait CacheEventConverter<K, V>: Send + Sync {
    /// Returns the value the listener should see.
    fn convert(&self, event: &CacheEvent<K, V>) -> Result<Option<V>>;
}

impl<K, V, F> CacheEventConverter<K, V> for F
where
    F: Fn(&CacheEvent<K, V>) -> Result<Option<V>> + Send + Sync,
{
    fn convert(&self, event: &CacheEvent<K, V>) -> Result<Option<V>> {
        self(event)
    }
}

/// Outcome of a combined filter and converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterConverted<V> {
    /// The event is dropped.
    Rejected,
    /// The event is delivered as is.
    Unchanged,
    /// The event is delivered with its value replaced.
    Converted(Option<V>),
}

/// Filters and converts in a single step.
pub trait CacheEventFilterConverter<K, V>: Send + Sync {
    /// Evaluates the event.
    fn filter_and_convert(&self, event: &CacheEvent<K, V>) -> Result<FilterConverted<V>>;
}

/// Pre-evaluates filters of one kind, typically backed by an index.
///
/// When a filter reports an [`indexing_kind`](CacheEventFilter::indexing_kind),
/// registration routes it through the provider of the same kind and uses the
/// filter the provider returns.
pub trait FilterIndexingProvider<K, V>: Send + Sync {
    /// The filter kind this provider handles.
    fn kind(&self) -> &str;

    /// Returns the filter to install in place of `filter`.
    fn index_filter(
        &self,
        filter: Arc<dyn CacheEventFilter<K, V>>,
    ) -> Result<Arc<dyn CacheEventFilter<K, V>>>;
}

/// The filter and converter stage of one listener registration.
///
/// Only entry events pass through the stage; transaction, topology and
/// partition events are delivered unchanged.
pub enum EventPipeline<K, V> {
    /// No filtering or conversion.
    Passthrough,
    /// An optional filter followed by an optional converter.
    Separate {
        /// Drops events the filter rejects.
        filter: Option<Arc<dyn CacheEventFilter<K, V>>>,
        /// Replaces the value of accepted events.
        converter: Option<Arc<dyn CacheEventConverter<K, V>>>,
    },
    /// A combined filter and converter.
    Combined(Arc<dyn CacheEventFilterConverter<K, V>>),
}

impl<K, V> EventPipeline<K, V> {
    /// Builds a pipeline from an optional filter and converter.
    pub fn new(
        filter: Option<Arc<dyn CacheEventFilter<K, V>>>,
        converter: Option<Arc<dyn CacheEventConverter<K, V>>>,
    ) -> Self {
        if filter.is_none() && converter.is_none() {
            Self::Passthrough
        } else {
            Self::Separate { filter, converter }
        }
    }

    /// Builds a pipeline from a combined filter and converter.
    pub fn combined(filter_converter: Arc<dyn CacheEventFilterConverter<K, V>>) -> Self {
        Self::Combined(filter_converter)
    }

    /// Returns `true` if the pipeline leaves every event untouched.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    /// Returns the separate filter stage, if any.
    pub fn filter(&self) -> Option<&Arc<dyn CacheEventFilter<K, V>>> {
        match self {
            Self::Separate { filter, .. } => filter.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn with_filter(self, replacement: Arc<dyn CacheEventFilter<K, V>>) -> Self {
        match self {
            Self::Separate { converter, .. } => Self::Separate {
                filter: Some(replacement),
                converter,
            },
            other => other,
        }
    }

    /// Runs the event through the pipeline. `Ok(None)` means the event was
    /// filtered out.
    pub fn apply(&self, event: CacheEvent<K, V>) -> Result<Option<CacheEvent<K, V>>> {
        if event.key().is_none() {
            return Ok(Some(event));
        }
        match self {
            Self::Passthrough => Ok(Some(event)),
            Self::Separate { filter, converter } => {
                if let Some(filter) = filter {
                    if !filter.accept(&event)? {
                        return Ok(None);
                    }
                }
                match converter {
                    Some(converter) => {
                        let value = converter.convert(&event)?;
                        Ok(Some(event.with_value(value)))
                    }
                    None => Ok(Some(event)),
                }
            }
            Self::Combined(filter_converter) => {
                match filter_converter.filter_and_convert(&event)? {
                    FilterConverted::Rejected => Ok(None),
                    FilterConverted::Unchanged => Ok(Some(event)),
                    FilterConverted::Converted(value) => Ok(Some(event.with_value(value))),
                }
            }
        }
    }
}

impl<K, V> Clone for EventPipeline<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Passthrough => Self::Passthrough,
            Self::Separate { filter, converter } => Self::Separate {
                filter: filter.clone(),
                converter: converter.clone(),
            },
            Self::Combined(filter_converter) => Self::Combined(Arc::clone(filter_converter)),
        }
    }
}

impl<K, V> Default for EventPipeline<K, V> {
    fn default() -> Self {
        Self::Passthrough
    }
}

impl<K, V> std::fmt::Debug for EventPipeline<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passthrough => f.write_str("Passthrough"),
            Self::Separate { filter, converter } => f
                .debug_struct("Separate")
                .field("filter", &filter.is_some())
                .field("converter", &converter.is_some())
                .finish(),
            Self::Combined(_) => f.write_str("Combined"),
        }
    }
}
