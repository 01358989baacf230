//! Mutation observation decisions
//!
//! The host delivers batched change records asynchronously. Everything that
//! is decided about a batch lives here as plain functions so it can be tested
//! without a document.

use crate::dom::DocumentHost;

/// A node reported as added by a mutation record.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedNode<N> {
    pub handle: N,
    /// Upper-case tag name, as reported by the DOM.
    pub tag: String,
    pub src: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord<N> {
    pub added: Vec<AddedNode<N>>,
    /// Name of the changed attribute for attribute records.
    pub attribute_name: Option<String>,
}

/// One asynchronous delivery of mutation records.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationBatch<N> {
    pub records: Vec<MutationRecord<N>>,
}

impl<N> Default for MutationBatch<N> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<N> MutationBatch<N> {
    /// Take ownership of every added node, in delivery order.
    pub fn into_added(self) -> Vec<AddedNode<N>> {
        self.records.into_iter().flat_map(|record| record.added).collect()
    }
}

/// A batch warrants a full re-check when it added any node at all.
pub fn should_recheck<N>(batch: &MutationBatch<N>) -> bool {
    batch.records.iter().any(|record| !record.added.is_empty())
}

/// Whether an attribute batch swapped a media source in place.
pub fn src_changed<N>(batch: &MutationBatch<N>) -> bool {
    batch
        .records
        .iter()
        .any(|record| record.attribute_name.as_deref() == Some("src"))
}

/// Tags whose source is checked against the block rules on insertion.
#[inline]
pub fn is_embed_tag(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("script") || tag.eq_ignore_ascii_case("iframe")
}

// =============================================================================
// Media Monitoring
// =============================================================================

/// Selector of the media elements watched for in-place source swaps.
pub const MEDIA_SELECTOR: &str = "video";

/// Mark an element as monitored. Returns true only the first time, so the
/// caller attaches exactly one observer per element.
pub fn claim_for_monitoring<H: DocumentHost>(host: &H, element: &H::Element, marker: &str) -> bool {
    if host.attribute(element, marker).as_deref() == Some("1") {
        return false;
    }
    host.set_attribute(element, marker, "1");
    true
}

/// Media elements that do not carry an observer yet; each is claimed.
pub fn unmonitored_media<H: DocumentHost>(host: &H, marker: &str) -> Vec<H::Element> {
    match host.query_all(MEDIA_SELECTOR) {
        Ok(elements) => elements
            .into_iter()
            .filter(|element| claim_for_monitoring(host, element, marker))
            .collect(),
        Err(e) => {
            log::debug!("{}", e);
            Vec::new()
        }
    }
}
