//! Checkpoint files.
//!
//! A checkpoint is up to three files:
//!
//! - model (JSON): schema, kind concentration and each kind's features and
//!   priors
//! - groups (JSON): each kind's mixture, including its id tracker
//! - assignments (JSON lines): one [`Assignment`] per tracked row, oldest
//!   first
//!
//! Group and assignment files are only meaningful alongside the model they
//! were dumped with.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::Schema;
use crate::engine::{Assignment, Assignments};
use crate::error::EngineError;
use crate::model::{CrossCat, Kind, Mixture, ProductModel};

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    schema: Schema,
    kind_alpha: f64,
    kinds: Vec<KindModel>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KindModel {
    featureids: Vec<usize>,
    model: ProductModel,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupsFile {
    kinds: Vec<Mixture>,
}

fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), EngineError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T, EngineError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn dump_model(cross_cat: &CrossCat, path: impl AsRef<Path>) -> Result<(), EngineError> {
    let file = ModelFile {
        schema: cross_cat.schema().clone(),
        kind_alpha: cross_cat.kind_alpha(),
        kinds: cross_cat
            .kinds()
            .iter()
            .map(|kind| KindModel {
                featureids: kind.featureids.clone(),
                model: kind.model.clone(),
            })
            .collect(),
    };
    write_json(path, &file)
}

/// Load a model with empty mixtures.
pub fn load_model(path: impl AsRef<Path>, empty_group_count: usize) -> Result<CrossCat, EngineError> {
    let file: ModelFile = read_json(path)?;
    if let Some(feature) = file.kinds.iter().flat_map(|k| &k.model.features).find(|f| !f.is_valid()) {
        return Err(EngineError::Checkpoint(format!("invalid feature model {feature:?}")));
    }
    let kinds = file
        .kinds
        .into_iter()
        .map(|k| Kind::new(k.featureids, k.model, empty_group_count))
        .collect();
    CrossCat::from_kinds(file.schema, kinds, file.kind_alpha)
}

pub fn dump_groups(cross_cat: &CrossCat, path: impl AsRef<Path>) -> Result<(), EngineError> {
    let file = GroupsFile {
        kinds: cross_cat.kinds().iter().map(|kind| kind.mixture.clone()).collect(),
    };
    write_json(path, &file)
}

/// Replace every kind's mixture with the one stored in `path`.
pub fn load_groups(cross_cat: &mut CrossCat, path: impl AsRef<Path>) -> Result<(), EngineError> {
    let file: GroupsFile = read_json(path)?;
    if file.kinds.len() != cross_cat.kind_count() {
        return Err(EngineError::Checkpoint(format!(
            "groups for {} kinds, model has {}",
            file.kinds.len(),
            cross_cat.kind_count()
        )));
    }
    for (kindid, (kind, mut mixture)) in cross_cat.kinds.iter_mut().zip(file.kinds).enumerate() {
        mixture.rebuild_index();
        let dims_match = mixture.groups().iter().all(|g| g.stats.len() == kind.model.dim());
        let empty = mixture.groups().iter().filter(|g| g.is_empty()).count();
        if !dims_match || empty != mixture.empty_group_count() || mixture.len() != mixture.id_tracker().len() {
            return Err(EngineError::Checkpoint(format!(
                "groups of kind {kindid} do not match its model"
            )));
        }
        kind.mixture = mixture;
    }
    let sizes: Vec<usize> = cross_cat.kinds().iter().map(|k| k.mixture.sample_size()).collect();
    if sizes.windows(2).any(|w| w[0] != w[1]) {
        return Err(EngineError::Checkpoint(format!("kinds hold different row counts: {sizes:?}")));
    }
    Ok(())
}

pub fn dump_assignments(assignments: &Assignments, path: impl AsRef<Path>) -> Result<(), EngineError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for assignment in assignments.iter() {
        serde_json::to_writer(&mut writer, &assignment)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_assignments(path: impl AsRef<Path>, dim: usize) -> Result<Assignments, EngineError> {
    let reader = BufReader::new(File::open(path)?);
    let mut assignments = Assignments::new(dim);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let assignment: Assignment = serde_json::from_str(&line)?;
        if assignment.groupids.len() != dim {
            return Err(EngineError::Checkpoint(format!(
                "row {} has {} group ids, model has {dim} kinds",
                assignment.rowid,
                assignment.groupids.len()
            )));
        }
        if assignments.contains(assignment.rowid) {
            return Err(EngineError::Checkpoint(format!(
                "row {} is assigned twice",
                assignment.rowid
            )));
        }
        assignments.push(&assignment);
    }
    Ok(assignments)
}
