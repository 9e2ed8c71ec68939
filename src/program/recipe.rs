//! Stage recipes
//!
//! A recipe fills a fresh [`LinearModel`] from stage data. Second-stage
//! recipes additionally receive the scenario payload and a
//! [`DecisionContext`] naming the first-stage columns they may couple to.

use anyhow::anyhow;
use std::fmt;
use std::sync::Arc;

use super::Stage;
use crate::model::{DecisionRef, LinearModel};

pub trait FirstStageRecipe<D1>: Send + Sync {
    fn generate(&self, data: &D1, model: &mut LinearModel) -> anyhow::Result<()>;
}

pub trait SecondStageRecipe<D2, S>: Send + Sync {
    fn generate(
        &self,
        data: &D2,
        decisions: &DecisionContext,
        scenario: &S,
        model: &mut LinearModel,
    ) -> anyhow::Result<()>;
}

impl<D1, F> FirstStageRecipe<D1> for F
where
    F: Fn(&D1, &mut LinearModel) -> anyhow::Result<()> + Send + Sync,
{
    fn generate(&self, data: &D1, model: &mut LinearModel) -> anyhow::Result<()> {
        self(data, model)
    }
}

impl<D2, S, F> SecondStageRecipe<D2, S> for F
where
    F: Fn(&D2, &DecisionContext, &S, &mut LinearModel) -> anyhow::Result<()> + Send + Sync,
{
    fn generate(
        &self,
        data: &D2,
        decisions: &DecisionContext,
        scenario: &S,
        model: &mut LinearModel,
    ) -> anyhow::Result<()> {
        self(data, decisions, scenario, model)
    }
}

/// A recipe bound to its stage
pub enum Recipe<D1, D2, S> {
    StageOne(Arc<dyn FirstStageRecipe<D1>>),
    StageTwo(Arc<dyn SecondStageRecipe<D2, S>>),
}

impl<D1, D2, S> Recipe<D1, D2, S> {
    pub fn stage_one<F>(f: F) -> Self
    where
        F: Fn(&D1, &mut LinearModel) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Recipe::StageOne(Arc::new(f))
    }

    pub fn stage_two<F>(f: F) -> Self
    where
        F: Fn(&D2, &DecisionContext, &S, &mut LinearModel) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Recipe::StageTwo(Arc::new(f))
    }

    pub fn stage(&self) -> Stage {
        match self {
            Recipe::StageOne(_) => Stage::One,
            Recipe::StageTwo(_) => Stage::Two,
        }
    }
}

impl<D1, D2, S> Clone for Recipe<D1, D2, S> {
    fn clone(&self) -> Self {
        match self {
            Recipe::StageOne(r) => Recipe::StageOne(Arc::clone(r)),
            Recipe::StageTwo(r) => Recipe::StageTwo(Arc::clone(r)),
        }
    }
}

impl<D1, D2, S> fmt::Debug for Recipe<D1, D2, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recipe({})", self.stage())
    }
}

/// First-stage columns visible to a second-stage recipe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionContext {
    names: Vec<String>,
}

impl DecisionContext {
    pub(crate) fn from_master(master: &LinearModel) -> Self {
        Self {
            names: master.variables().iter().map(|v| v.name.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Reference to the first-stage column called `name`
    pub fn decision(&self, name: &str) -> anyhow::Result<DecisionRef> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(DecisionRef)
            .ok_or_else(|| anyhow!("unknown first-stage decision '{}'", name))
    }

    pub fn at(&self, index: usize) -> anyhow::Result<DecisionRef> {
        if index < self.names.len() {
            Ok(DecisionRef(index))
        } else {
            Err(anyhow!(
                "first-stage decision {} out of range ({} decisions)",
                index,
                self.names.len()
            ))
        }
    }

    pub fn all(&self) -> Vec<DecisionRef> {
        (0..self.names.len()).map(DecisionRef).collect()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
