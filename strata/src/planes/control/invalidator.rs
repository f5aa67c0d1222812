use crate::keys::tag_key;
use crate::ports::RemoteStore;
use shared::Error;

/// Members are deleted in batches of this size so one bad batch does not
/// lose the count of the ones already removed.
const DELETE_BATCH: usize = 500;

/// Outcome of a tag invalidation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub removed: u64,
    pub failed_tags: Vec<String>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed_tags.is_empty()
    }
}

/// Bulk removal of every entry indexed under a set of tags.
pub struct Invalidator<'a> {
    store: &'a dyn RemoteStore,
}

impl<'a> Invalidator<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self { store }
    }

    /// For each tag: read its members, delete them, then drop the index.
    /// A failing tag is logged and skipped; the rest still run.
    pub async fn invalidate<S: AsRef<str>>(&self, tags: &[S]) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        for tag in tags {
            let tag = tag.as_ref();
            match self.invalidate_tag(tag, &mut report.removed).await {
                Ok(()) => tracing::debug!(tag = %tag, "tag invalidated"),
                Err(e) => {
                    tracing::warn!(tag = %tag, error = %e, "tag invalidation incomplete");
                    report.failed_tags.push(tag.to_string());
                }
            }
        }

        report
    }

    async fn invalidate_tag(&self, tag: &str, removed: &mut u64) -> Result<(), Error> {
        let index_key = tag_key(tag);
        let index = self.store.tag_index();

        let members = index.members(&index_key).await.map_err(|e| Error::Invalidation {
            tag: tag.to_string(),
            reason: e.to_string(),
        })?;

        for batch in members.chunks(DELETE_BATCH) {
            let deleted = self
                .store
                .delete(batch)
                .await
                .map_err(|e| Error::Invalidation {
                    tag: tag.to_string(),
                    reason: e.to_string(),
                })?;
            *removed += deleted;
        }

        index
            .delete_index(&index_key)
            .await
            .map_err(|e| Error::Invalidation {
                tag: tag.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
