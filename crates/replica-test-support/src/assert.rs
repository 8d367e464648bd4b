//! Assertions over the copy ledger shared by engine and store suites.

use anyhow::{Result, bail, ensure};
use replica_core::{
    CopyPlan, CopyStatus, EntityMapping, EntityType, HistoryAction, HistoryEntry,
    MappingRegistry,
};
use uuid::Uuid;

/// Fail unless every mapping of the operation has `status`.
///
/// # Errors
///
/// Returns an error naming the first mapping with a different status.
pub async fn all_mappings_have_status<R>(
    registry: &R,
    operation_id: Uuid,
    status: CopyStatus,
) -> Result<()>
where
    R: MappingRegistry + ?Sized,
{
    for mapping in registry.list_mappings(operation_id).await? {
        ensure!(
            mapping.status == status,
            "{} {} is {:?}, expected {status:?}",
            mapping.entity_type,
            mapping.source_entity_id,
            mapping.status
        );
    }
    Ok(())
}

/// The single mapping recorded for `entity_type`.
///
/// # Errors
///
/// Returns an error unless exactly one mapping of the type exists.
pub fn mapping_of(mappings: &[EntityMapping], entity_type: EntityType) -> Result<&EntityMapping> {
    let mut matching = mappings
        .iter()
        .filter(|mapping| mapping.entity_type == entity_type);
    let Some(first) = matching.next() else {
        bail!("no {entity_type} mapping recorded");
    };
    ensure!(matching.next().is_none(), "several {entity_type} mappings recorded");
    Ok(first)
}

/// Check that no mapping completed before its parents did.
///
/// Mappings are expected in creation order; a parent must have been created and
/// completed ahead of each completed dependent.
///
/// # Errors
///
/// Returns an error naming the first dependent that precedes a parent.
pub fn topological_order(plan: &CopyPlan, mappings: &[EntityMapping]) -> Result<()> {
    for planned in plan.iter() {
        let Some(position) = mappings
            .iter()
            .position(|mapping| (mapping.entity_type, mapping.source_entity_id) == planned.key())
        else {
            continue;
        };
        if mappings[position].status == CopyStatus::Pending {
            continue;
        }
        for parent in &planned.parents {
            let parent_done = mappings[..position].iter().any(|mapping| {
                mapping.entity_type == parent.entity_type
                    && mapping.source_entity_id == parent.source_id
                    && mapping.status == CopyStatus::Completed
            });
            ensure!(
                parent_done,
                "{} {} advanced before parent {} {} completed",
                planned.entity_type,
                planned.source_id,
                parent.entity_type,
                parent.source_id
            );
        }
    }
    Ok(())
}

/// Actions of the history entries, in order.
#[must_use]
pub fn actions(history: &[HistoryEntry]) -> Vec<HistoryAction> {
    history.iter().map(|entry| entry.action).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use replica_core::{ParentRef, PlannedEntity};

    fn mapping(id: i64, entity_type: EntityType, source: i64, status: CopyStatus) -> EntityMapping {
        EntityMapping {
            id,
            operation_id: Uuid::nil(),
            entity_type,
            source_entity_id: source,
            target_entity_id: None,
            blobs: Vec::new(),
            status,
            error_message: None,
            attempts: 1,
            updated_at: Utc::now(),
        }
    }

    fn plan() -> CopyPlan {
        CopyPlan {
            root_training_id: 3,
            entities: vec![
                PlannedEntity::root(EntityType::Dataset, 1),
                PlannedEntity::with_parents(
                    EntityType::DatasetConfig,
                    2,
                    vec![ParentRef {
                        entity_type: EntityType::Dataset,
                        source_id: 1,
                    }],
                ),
            ],
        }
    }

    #[test]
    fn dependent_before_parent_is_reported() {
        let mappings = vec![
            mapping(1, EntityType::DatasetConfig, 2, CopyStatus::InProgress),
            mapping(2, EntityType::Dataset, 1, CopyStatus::Completed),
        ];
        assert!(topological_order(&plan(), &mappings).is_err());

        let ordered = vec![
            mapping(1, EntityType::Dataset, 1, CopyStatus::Completed),
            mapping(2, EntityType::DatasetConfig, 2, CopyStatus::Completed),
        ];
        assert!(topological_order(&plan(), &ordered).is_ok());
    }

    #[test]
    fn mapping_of_requires_a_single_match() {
        let mappings = vec![mapping(1, EntityType::Dataset, 1, CopyStatus::Completed)];
        assert!(mapping_of(&mappings, EntityType::Dataset).is_ok());
        assert!(mapping_of(&mappings, EntityType::Model).is_err());
    }
}
