//! Generic entity-graph copy between two mappers.

use crate::error::CoreResult;
use crate::feature::{SingleFeatureKey, StoredShape};
use crate::mapper::DataMapper;
use tracing::{debug, info};

/// Entities between two progress log lines.
const PROGRESS_INTERVAL: u64 = 10_000;

/// Outcome of a copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Number of entities copied.
    pub entities: u64,
    /// Number of non-empty features copied.
    pub features: u64,
    /// Number of elements written (single values and many elements).
    pub elements: u64,
    /// Whether physical records were copied directly.
    pub fast_path: bool,
}

/// Copies every entity of `source` into `target` through the per-feature API.
///
/// For each entity the class binding, the container edge and every stored
/// feature are written. Many-valued features are cleared before being
/// appended, so running the copy again yields the same target: a failed
/// copy is restarted from scratch rather than resumed.
///
/// # Errors
///
/// Returns the first error raised by either mapper.
pub fn copy_all<S>(source: &S, target: &dyn DataMapper) -> CoreResult<CopyReport>
where
    S: DataMapper + ?Sized,
{
    let entities = source.entities()?;
    info!(
        source = source.name(),
        target = target.name(),
        entities = entities.len(),
        "copying entities"
    );

    let mut report = CopyReport::default();
    for id in &entities {
        if let Some(class) = source.class_of(id)? {
            target.class_for(id, &class)?;
        }
        match source.container_of(id)? {
            Some(edge) => {
                target.container_for(id, edge)?;
            }
            None => {
                target.remove_container(id)?;
            }
        }

        for feature in source.features_of(id)? {
            let key = SingleFeatureKey::new(*id, feature.name);
            match feature.shape {
                StoredShape::Single => {
                    if let Some(slot) = source.get_single(&key)? {
                        target.set_single(&key, slot)?;
                        report.elements += 1;
                    }
                }
                StoredShape::Many => {
                    let slots = source.all_of(&key)?;
                    report.elements += slots.len() as u64;
                    target.clear(&key)?;
                    target.append_all(&key, slots)?;
                }
            }
            report.features += 1;
        }

        report.entities += 1;
        if report.entities % PROGRESS_INTERVAL == 0 {
            debug!(copied = report.entities, total = entities.len(), "copy progress");
        }
    }

    info!(
        entities = report.entities,
        features = report.features,
        elements = report.elements,
        "copy complete"
    );
    Ok(report)
}
