//! Common routines for reading model input files.
use crate::plan::{Plan, PlanKey, PlanTable, process_plan};
use crate::plant::Plant;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

pub mod model;
use model::PlantFile;

/// The name of the file describing the topology of the plant
const PLANT_FILE_NAME: &str = "plant.toml";

/// The name of the file containing the predicted plan
const PLAN_FILE_NAME: &str = "plan.csv";

/// The name of the index column of a plan file
const TIME_COLUMN: &str = "time";

/// Format an error message for the given input file
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Read and deserialise a TOML file.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;

    Ok(toml_data)
}

/// Parse a single cell of a plan file, treating an empty cell as a null value
fn parse_plan_cell(cell: &str) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }

    cell.parse()
        .with_context(|| format!("Invalid value '{cell}' in plan"))
}

/// Read a plan from a CSV file whose first column holds the time labels.
///
/// The other column headers are plan keys, i.e. `source -> destination` for edges and the name
/// of the machine for states. Empty cells are null values.
pub fn read_plan_csv(file_path: &Path) -> Result<PlanTable> {
    let inner = || -> Result<PlanTable> {
        let mut reader = csv::Reader::from_path(file_path)?;
        let headers = reader.headers()?.clone();
        ensure!(
            headers.get(0).map(str::trim) == Some(TIME_COLUMN),
            "The first column of a plan should be '{TIME_COLUMN}'"
        );

        let keys: Vec<PlanKey> = headers
            .iter()
            .skip(1)
            .map(str::parse::<PlanKey>)
            .try_collect()?;
        ensure!(keys.iter().all_unique(), "Plan columns must be unique");
        let mut columns: IndexMap<PlanKey, Vec<f64>> =
            keys.iter().map(|key| (key.clone(), Vec::new())).collect();

        // Rows of unequal length are rejected by the reader
        let mut index = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut cells = record.iter();
            index.push(cells.next().unwrap_or_default().trim().to_string());
            for (values, cell) in columns.values_mut().zip(cells) {
                values.push(parse_plan_cell(cell)?);
            }
        }
        ensure!(!index.is_empty(), "Plan cannot be empty");

        Ok(PlanTable { index, columns })
    };

    inner().with_context(|| input_err_msg(file_path))
}

/// A model loaded from disk
pub struct Model {
    /// The plant to simulate
    pub plant: Plant,
    /// The predicted plan
    pub plan: Plan,
    /// The seed of the random number generator
    pub seed: u64,
}

/// Load a model from the specified directory.
///
/// The plant is read from `plant.toml` and the plan from `plan.csv`. Both are checked: the plant
/// must be structurally valid and the plan must cover exactly its edges and machines.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
pub fn load_model<P: AsRef<Path>>(model_dir: P) -> Result<Model> {
    let model_dir = model_dir.as_ref();
    let plant_path = model_dir.join(PLANT_FILE_NAME);
    let plant_file: PlantFile = read_toml(&plant_path)?;
    let seed = plant_file.seed;
    let plant = plant_file
        .into_plant()
        .with_context(|| input_err_msg(&plant_path))?;
    plant.validate().with_context(|| input_err_msg(&plant_path))?;
    debug!(
        "Read plant with {} nodes and {} edges",
        plant.nodes().len(),
        plant.edge_keys().len()
    );

    // The time labels of the plan must match the horizon of the plant
    let plan_path = model_dir.join(PLAN_FILE_NAME);
    let plan = read_plan_csv(&plan_path)?
        .into_plan(plant.horizon())
        .with_context(|| input_err_msg(&plan_path))?;
    // Check the plan now rather than at the start of the run
    process_plan(
        &plan,
        &plant.machine_names(),
        &plant.edge_keys(),
        plant.horizon(),
    )
    .with_context(|| input_err_msg(&plan_path))?;

    Ok(Model { plant, plan, seed })
}
