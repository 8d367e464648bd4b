//! Expands a source training into the ordered list of entities to copy.
//!
//! The walk follows each row's parent references upward from the training, then
//! adds the training's model. Ordering comes from [`EntityType::rank`], and the
//! result is checked against the precedence table before it is returned.

use std::collections::BTreeMap;

use replica_core::{
    CopyError, CopyPlan, CopyResult, EntityRow, EntityType, ParentRef, PipelineCatalog,
    PlannedEntity,
};
use tracing::debug;

const fn missing_reason(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Dataset => "dataset missing",
        EntityType::DatasetConfig => "dataset configuration missing",
        EntityType::AlgorithmConfig | EntityType::CustomAlgorithmConfig => {
            "algorithm configuration missing"
        }
        EntityType::Training => "training missing",
        EntityType::Model => "model missing",
    }
}

/// Build the copy plan for `training_id`.
///
/// # Errors
///
/// - [`CopyError::NotFound`] when the training does not exist.
/// - [`CopyError::Structural`] when a required ancestor is absent or dangling.
/// - [`CopyError::Store`] when the catalog cannot be read.
pub async fn plan_copy<C>(catalog: &C, training_id: i64) -> CopyResult<CopyPlan>
where
    C: PipelineCatalog + ?Sized,
{
    let root = catalog
        .load_row(EntityType::Training, training_id)
        .await?
        .ok_or_else(|| CopyError::not_found("training", training_id))?;

    let mut rows: BTreeMap<(usize, i64), (EntityType, Vec<ParentRef>)> = BTreeMap::new();
    let mut pending: Vec<((EntityType, i64), EntityRow)> =
        vec![((EntityType::Training, training_id), root)];

    while let Some(((entity_type, source_id), row)) = pending.pop() {
        if row.entity_type() != entity_type {
            return Err(CopyError::Structural {
                entity_type,
                source_id,
                reason: "row type mismatch",
            });
        }
        let mut parents = Vec::new();
        for (parent_type, parent_id) in row.parent_ids() {
            parents.push(ParentRef {
                entity_type: parent_type,
                source_id: parent_id,
            });
            if rows.contains_key(&(parent_type.rank(), parent_id)) {
                continue;
            }
            let parent_row = catalog
                .load_row(parent_type, parent_id)
                .await?
                .ok_or(CopyError::Structural {
                    entity_type: parent_type,
                    source_id: parent_id,
                    reason: missing_reason(parent_type),
                })?;
            pending.push(((parent_type, parent_id), parent_row));
        }
        rows.insert((entity_type.rank(), source_id), (entity_type, parents));
    }

    if let Some(model_id) = catalog.model_for_training(training_id).await? {
        rows.insert(
            (EntityType::Model.rank(), model_id),
            (
                EntityType::Model,
                vec![ParentRef {
                    entity_type: EntityType::Training,
                    source_id: training_id,
                }],
            ),
        );
    }

    let plan = CopyPlan {
        root_training_id: training_id,
        entities: rows
            .into_iter()
            .map(|((_, source_id), (entity_type, parents))| {
                PlannedEntity::with_parents(entity_type, source_id, parents)
            })
            .collect(),
    };
    plan.validate()?;
    debug!(training_id, entities = plan.len(), "copy plan built");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::TargetOwner;
    use replica_test_support::fixtures::{PipelineShape, seed_pipeline};
    use replica_test_support::mocks::{MemoryCopyStore, MemoryObjectStore};
    use uuid::Uuid;

    fn owner() -> TargetOwner {
        TargetOwner::User(Uuid::new_v4())
    }

    fn types(plan: &CopyPlan) -> Vec<EntityType> {
        plan.iter().map(|entity| entity.entity_type).collect()
    }

    #[tokio::test]
    async fn standard_pipeline_is_planned_in_topological_order() {
        let store = MemoryCopyStore::new();
        let seeded =
            seed_pipeline(&store, &MemoryObjectStore::new(), &PipelineShape::standard(owner()))
                .await;

        let plan = plan_copy(&store, seeded.training_id).await.expect("plan");
        assert_eq!(
            types(&plan),
            vec![
                EntityType::Dataset,
                EntityType::DatasetConfig,
                EntityType::AlgorithmConfig,
                EntityType::Training,
                EntityType::Model,
            ]
        );
        let training = &plan.entities[3];
        assert_eq!(training.source_id, seeded.training_id);
        assert!(training.parents.contains(&ParentRef {
            entity_type: EntityType::DatasetConfig,
            source_id: seeded.dataset_config_id,
        }));
    }

    #[tokio::test]
    async fn both_algorithm_kinds_are_planned_and_model_is_optional() {
        let store = MemoryCopyStore::new();
        let shape = PipelineShape::standard(owner())
            .with_custom_algorithm("params/p.json")
            .without_model();
        let seeded = seed_pipeline(&store, &MemoryObjectStore::new(), &shape).await;

        let plan = plan_copy(&store, seeded.training_id).await.expect("plan");
        assert_eq!(
            types(&plan),
            vec![
                EntityType::Dataset,
                EntityType::DatasetConfig,
                EntityType::AlgorithmConfig,
                EntityType::CustomAlgorithmConfig,
                EntityType::Training,
            ]
        );
    }

    #[tokio::test]
    async fn custom_algorithm_alone_is_sufficient() {
        let store = MemoryCopyStore::new();
        let shape = PipelineShape::standard(owner())
            .without_algorithm_config()
            .with_custom_algorithm("params/p.json");
        let seeded = seed_pipeline(&store, &MemoryObjectStore::new(), &shape).await;
        let plan = plan_copy(&store, seeded.training_id).await.expect("plan");
        assert!(types(&plan).contains(&EntityType::CustomAlgorithmConfig));
        assert!(!types(&plan).contains(&EntityType::AlgorithmConfig));
    }

    #[tokio::test]
    async fn training_without_algorithm_plans_four_entities() {
        let store = MemoryCopyStore::new();
        let shape = PipelineShape::standard(owner()).without_algorithm_config();
        let seeded = seed_pipeline(&store, &MemoryObjectStore::new(), &shape).await;

        let plan = plan_copy(&store, seeded.training_id).await.expect("plan");
        assert_eq!(
            types(&plan),
            vec![
                EntityType::Dataset,
                EntityType::DatasetConfig,
                EntityType::Training,
                EntityType::Model,
            ]
        );
    }

    #[tokio::test]
    async fn dangling_algorithm_configuration_is_structural() {
        let store = MemoryCopyStore::new();
        let seeded =
            seed_pipeline(&store, &MemoryObjectStore::new(), &PipelineShape::standard(owner()))
                .await;
        let algorithm_config_id = seeded.algorithm_config_id.expect("seeded algorithm");
        store
            .remove_row(EntityType::AlgorithmConfig, algorithm_config_id)
            .await;

        let err = plan_copy(&store, seeded.training_id)
            .await
            .expect_err("dangling reference");
        assert!(matches!(
            err,
            CopyError::Structural {
                entity_type: EntityType::AlgorithmConfig,
                source_id,
                reason: "algorithm configuration missing",
            } if source_id == algorithm_config_id
        ));
    }

    #[tokio::test]
    async fn dangling_dataset_configuration_is_structural() {
        let store = MemoryCopyStore::new();
        let seeded =
            seed_pipeline(&store, &MemoryObjectStore::new(), &PipelineShape::standard(owner()))
                .await;
        store
            .remove_row(EntityType::DatasetConfig, seeded.dataset_config_id)
            .await;

        let err = plan_copy(&store, seeded.training_id)
            .await
            .expect_err("dangling reference");
        assert!(matches!(
            err,
            CopyError::Structural {
                entity_type: EntityType::DatasetConfig,
                source_id,
                reason: "dataset configuration missing",
            } if source_id == seeded.dataset_config_id
        ));
    }

    #[tokio::test]
    async fn unknown_training_is_not_found() {
        let store = MemoryCopyStore::new();
        let err = plan_copy(&store, 404).await.expect_err("missing root");
        assert!(matches!(err, CopyError::NotFound { resource: "training", .. }));
    }
}
