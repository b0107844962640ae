//! Loader plans - which indexes to build, and when
//!
//! A [`LoaderPlan`] names the primary index set per arity (built directly
//! from the input in phase one) and an ordered list of secondary groups
//! (each built later by replaying the first primary index). Plans are
//! plain serde data, so they can live in configuration.

use crate::error::{LoaderError, Result};
use basalt_core::{DatasetStorage, TupleTable};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Phased index-build configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderPlan {
    /// Triple indexes built during the primary phase; the first is the
    /// replay source for secondary phases
    pub primary_triples: Vec<String>,
    /// Quad indexes built during the primary phase
    pub primary_quads: Vec<String>,
    /// Ordered secondary triple-index groups, one replay phase each
    #[serde(default)]
    pub secondary_triples: Vec<Vec<String>>,
    /// Ordered secondary quad-index groups
    #[serde(default)]
    pub secondary_quads: Vec<Vec<String>>,
}

impl LoaderPlan {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Plan that builds the primary index first and every other declared
    /// index of each table in one secondary phase
    pub fn default_for(dataset: &DatasetStorage) -> Self {
        let split = |table: &TupleTable| -> (Vec<String>, Vec<Vec<String>>) {
            let names: Vec<String> = table
                .indexes()
                .iter()
                .map(|ix| ix.name().to_string())
                .collect();
            let primary = vec![names[0].clone()];
            let rest: Vec<String> = names.into_iter().skip(1).collect();
            let secondary = if rest.is_empty() { vec![] } else { vec![rest] };
            (primary, secondary)
        };
        let (primary_triples, secondary_triples) = split(dataset.triples());
        let (primary_quads, secondary_quads) = split(dataset.quads());
        LoaderPlan {
            primary_triples,
            primary_quads,
            secondary_triples,
            secondary_quads,
        }
    }

    /// Check every named index exists and no name repeats within an arity,
    /// before any data flows
    pub fn validate(&self, dataset: &DatasetStorage) -> Result<()> {
        Self::validate_arity(
            dataset.triples(),
            &self.primary_triples,
            &self.secondary_triples,
        )?;
        Self::validate_arity(dataset.quads(), &self.primary_quads, &self.secondary_quads)
    }

    fn validate_arity(
        table: &TupleTable,
        primary: &[String],
        secondary: &[Vec<String>],
    ) -> Result<()> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for name in primary.iter().chain(secondary.iter().flatten()) {
            table.index_by_name(name)?;
            if !seen.insert(name) {
                return Err(LoaderError::DuplicatePlanIndex(name.clone()));
            }
        }
        Ok(())
    }

    /// True if the plan builds nothing for the given arity
    pub fn is_empty_for(&self, arity: usize) -> bool {
        match arity {
            3 => self.primary_triples.is_empty(),
            _ => self.primary_quads.is_empty(),
        }
    }
}
