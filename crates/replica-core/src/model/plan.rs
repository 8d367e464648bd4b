//! Ordered copy plans produced once per operation and cached on it.

use serde::{Deserialize, Serialize};

use crate::error::{CopyError, CopyResult};
use crate::model::EntityType;

/// Reference from a planned entity to one of its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    /// Parent entity type.
    pub entity_type: EntityType,
    /// Parent source identifier.
    pub source_id: i64,
}

/// One entity instance to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedEntity {
    /// Entity type.
    pub entity_type: EntityType,
    /// Source identifier.
    pub source_id: i64,
    /// Parents whose targets this entity's row references.
    pub parents: Vec<ParentRef>,
}

impl PlannedEntity {
    /// Planned entity without parents.
    #[must_use]
    pub const fn root(entity_type: EntityType, source_id: i64) -> Self {
        Self {
            entity_type,
            source_id,
            parents: Vec::new(),
        }
    }

    /// Planned entity with the given parents.
    #[must_use]
    pub const fn with_parents(
        entity_type: EntityType,
        source_id: i64,
        parents: Vec<ParentRef>,
    ) -> Self {
        Self {
            entity_type,
            source_id,
            parents,
        }
    }

    /// Key identifying the instance inside an operation.
    #[must_use]
    pub const fn key(&self) -> (EntityType, i64) {
        (self.entity_type, self.source_id)
    }
}

/// Topologically ordered list of entities to copy for one source training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyPlan {
    /// Training the plan was expanded from.
    pub root_training_id: i64,
    /// Entities in copy order.
    pub entities: Vec<PlannedEntity>,
}

impl CopyPlan {
    /// Number of planned entities.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the plan has no entities.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterate planned entities in copy order.
    pub fn iter(&self) -> impl Iterator<Item = &PlannedEntity> {
        self.entities.iter()
    }

    /// Check the plan against the precedence table.
    ///
    /// Every parent must be planned earlier and be of a permitted parent type. A
    /// training needs its dataset configuration; algorithm configurations of
    /// either kind are optional.
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::Structural`] describing the first violation.
    pub fn validate(&self) -> CopyResult<()> {
        let mut seen: Vec<(EntityType, i64)> = Vec::with_capacity(self.entities.len());
        let mut has_root = false;
        for entity in &self.entities {
            let violation = |reason: &'static str| CopyError::Structural {
                entity_type: entity.entity_type,
                source_id: entity.source_id,
                reason,
            };
            if seen.contains(&entity.key()) {
                return Err(violation("entity planned twice"));
            }
            for parent in &entity.parents {
                if !entity.entity_type.accepts_parent(parent.entity_type) {
                    return Err(violation("parent type not permitted"));
                }
                if !seen.contains(&(parent.entity_type, parent.source_id)) {
                    return Err(violation("parent planned after dependent"));
                }
            }
            let required: &[EntityType] = match entity.entity_type {
                EntityType::DatasetConfig => &[EntityType::Dataset],
                EntityType::Training => &[EntityType::DatasetConfig],
                EntityType::Model => &[EntityType::Training],
                _ => &[],
            };
            for kind in required {
                if !entity.parents.iter().any(|parent| parent.entity_type == *kind) {
                    return Err(violation("required parent missing"));
                }
            }
            if entity.entity_type == EntityType::Training
                && entity.source_id == self.root_training_id
            {
                has_root = true;
            }
            seen.push(entity.key());
        }
        if has_root {
            Ok(())
        } else {
            Err(CopyError::Structural {
                entity_type: EntityType::Training,
                source_id: self.root_training_id,
                reason: "root training not planned",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(entity_type: EntityType, source_id: i64) -> ParentRef {
        ParentRef {
            entity_type,
            source_id,
        }
    }

    fn pipeline() -> CopyPlan {
        CopyPlan {
            root_training_id: 30,
            entities: vec![
                PlannedEntity::root(EntityType::Dataset, 10),
                PlannedEntity::with_parents(
                    EntityType::DatasetConfig,
                    11,
                    vec![parent(EntityType::Dataset, 10)],
                ),
                PlannedEntity::root(EntityType::AlgorithmConfig, 20),
                PlannedEntity::with_parents(
                    EntityType::Training,
                    30,
                    vec![
                        parent(EntityType::DatasetConfig, 11),
                        parent(EntityType::AlgorithmConfig, 20),
                    ],
                ),
                PlannedEntity::with_parents(
                    EntityType::Model,
                    40,
                    vec![parent(EntityType::Training, 30)],
                ),
            ],
        }
    }

    #[test]
    fn valid_plan_passes() {
        let plan = pipeline();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.len(), 5);
        assert!(!plan.is_empty());
    }

    #[test]
    fn dependent_before_parent_is_rejected() {
        let mut plan = pipeline();
        plan.entities.swap(0, 1);
        let err = plan.validate().expect_err("order violation");
        assert!(matches!(
            err,
            CopyError::Structural {
                entity_type: EntityType::DatasetConfig,
                reason: "parent planned after dependent",
                ..
            }
        ));
    }

    #[test]
    fn training_without_algorithm_is_valid() {
        let mut plan = pipeline();
        plan.entities.retain(|e| e.entity_type != EntityType::AlgorithmConfig);
        plan.entities[2].parents.retain(|p| p.entity_type != EntityType::AlgorithmConfig);
        assert_eq!(plan.entities[2].entity_type, EntityType::Training);
        plan.validate().expect("algorithm configurations are optional");
    }

    #[test]
    fn duplicate_and_foreign_parent_rejected() {
        let mut plan = pipeline();
        plan.entities.push(PlannedEntity::root(EntityType::Dataset, 10));
        assert!(plan.validate().is_err());

        let mut plan = pipeline();
        plan.entities[4].parents.push(parent(EntityType::Dataset, 10));
        let err = plan.validate().expect_err("model cannot reference dataset");
        assert!(matches!(
            err,
            CopyError::Structural {
                reason: "parent type not permitted",
                ..
            }
        ));
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = pipeline();
        let value = serde_json::to_value(&plan).expect("serialize plan");
        let restored: CopyPlan = serde_json::from_value(value).expect("deserialize plan");
        assert_eq!(restored, plan);
    }
}
