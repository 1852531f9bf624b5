//! The module responsible for writing output data to disk.
use crate::edge::{EdgeKey, EdgeView};
use crate::horizon::Horizon;
use crate::id::NodeID;
use crate::node::NodeView;
use crate::plant::{EdgeFilter, Plant};
use crate::series::Series;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "plantsim_results";

/// The output file name for edge flows
const FLOWS_FILE_NAME: &str = "flows.csv";

/// The output file name for machine states
const STATES_FILE_NAME: &str = "states.csv";

/// The output file name for storage levels
const STORAGE_FILE_NAME: &str = "storage.csv";

/// The output file name for customer demands
const DEMANDS_FILE_NAME: &str = "demands.csv";

/// The output file name for purchaser buying prices
const BUYING_PRICES_FILE_NAME: &str = "buying_prices.csv";

/// The output file name for supplier selling prices
const SELL_PRICES_FILE_NAME: &str = "sell_prices.csv";

/// The output file name for the dump of all entities
const ENTITIES_FILE_NAME: &str = "entities.json";

/// The name of the index column of every CSV file
const TIME_COLUMN: &str = "time";

/// Get the default output folder for the model in the specified directory
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    // Get the model name from the dir path
    let model_dir = model_dir
        .canonicalize() // canonicalise in case the user has specified "."
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    // Construct path
    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create a new output directory, with parents.
///
/// A non-empty directory is only reused if `overwrite` is set, in which case its contents are
/// deleted first.
///
/// # Returns
///
/// Whether an existing non-empty directory was overwritten
pub fn create_output_directory(output_dir: &Path, overwrite: bool) -> Result<bool> {
    let is_non_empty = output_dir.is_dir() && fs::read_dir(output_dir)?.next().is_some();
    if is_non_empty {
        ensure!(
            overwrite,
            "Output folder already exists and is not empty. Use --overwrite to replace it."
        );
        fs::remove_dir_all(output_dir)?;
    }

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(is_non_empty)
}

/// The realised values of a completed simulation, indexed by the horizon
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationOutput {
    /// The horizon of the plant
    pub horizon: Horizon,
    /// Flows through each edge
    pub flows: IndexMap<EdgeKey, Series>,
    /// States of each machine, `NaN` when switched off
    pub states: IndexMap<NodeID, Series>,
    /// Stored amounts of each storage
    pub storage: IndexMap<NodeID, Series>,
    /// Demands of each customer
    pub demands: IndexMap<NodeID, Series>,
    /// Buying prices of each purchaser
    pub buying_prices: IndexMap<NodeID, Series>,
    /// Selling prices of each supplier
    pub sell_prices: IndexMap<NodeID, Series>,
}

impl SimulationOutput {
    /// Collect the histories of every entity of the plant
    pub fn from_plant(plant: &Plant) -> Self {
        let mut output = Self {
            horizon: plant.horizon().clone(),
            flows: IndexMap::new(),
            states: IndexMap::new(),
            storage: IndexMap::new(),
            demands: IndexMap::new(),
            buying_prices: IndexMap::new(),
            sell_prices: IndexMap::new(),
        };

        // Each kind of node contributes the history of one table
        for (name, view) in plant.nodes() {
            let (table, series) = match view {
                NodeView::Supplier(view) => (&mut output.sell_prices, view.prices),
                NodeView::Customer(view) => (&mut output.demands, view.demands),
                NodeView::Purchaser(view) => (&mut output.buying_prices, view.prices),
                NodeView::Machine(view) => (&mut output.states, view.states),
                NodeView::Storage(view) => (&mut output.storage, view.storage),
            };
            table.insert(name, series);
        }
        output.flows = plant
            .edges(&EdgeFilter::default())
            .into_iter()
            .map(|(key, view)| (key, view.flows))
            .collect();

        output
    }

    /// Write every table to a CSV file in the given folder
    pub fn write_csv(&self, output_path: &Path) -> Result<()> {
        let flows = self
            .flows
            .iter()
            .map(|(key, series)| (key.column_name(), series));
        self.write_table(&output_path.join(FLOWS_FILE_NAME), flows)?;

        let tables = [
            (STATES_FILE_NAME, &self.states),
            (STORAGE_FILE_NAME, &self.storage),
            (DEMANDS_FILE_NAME, &self.demands),
            (BUYING_PRICES_FILE_NAME, &self.buying_prices),
            (SELL_PRICES_FILE_NAME, &self.sell_prices),
        ];
        for (file_name, table) in tables {
            let columns = table
                .iter()
                .map(|(name, series)| (name.to_string(), series));
            self.write_table(&output_path.join(file_name), columns)?;
        }

        Ok(())
    }

    /// Write a single table with one row per time step and one column per series.
    ///
    /// `NaN` values are written as empty cells.
    fn write_table<'a, I>(&self, file_path: &Path, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, &'a Series)>,
    {
        let (names, columns): (Vec<_>, Vec<_>) = columns.into_iter().unzip();
        let mut writer = csv::Writer::from_path(file_path)
            .with_context(|| format!("Could not create {}", file_path.display()))?;

        // Header row
        writer.write_record(std::iter::once(TIME_COLUMN.to_string()).chain(names))?;
        for (step, label) in self.horizon.iter().enumerate() {
            let cells = columns.iter().map(|series| match series.get(step) {
                Some(value) if !value.is_nan() => value.to_string(),
                _ => String::new(),
            });
            writer.write_record(std::iter::once(label.to_string()).chain(cells))?;
        }
        writer.flush()?;

        Ok(())
    }
}

/// All entities of a plant, as dumped for debugging
#[derive(Serialize)]
struct Entities {
    nodes: Vec<NodeView>,
    edges: Vec<EdgeView>,
}

/// Write the views of every node and edge of the plant to a JSON file.
///
/// Null values and infinite bounds are written as `null`.
pub fn write_entities_json(output_path: &Path, plant: &Plant) -> Result<()> {
    let entities = Entities {
        nodes: plant.nodes().into_values().collect(),
        edges: plant.edges(&EdgeFilter::default()).into_values().collect(),
    };
    let file_path = output_path.join(ENTITIES_FILE_NAME);
    let file = File::create(&file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &entities)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{simple_plan, simple_plant};
    use crate::plan::{Plan, PlanKey, PlanValue};
    use crate::recourse::follow_plan;
    use itertools::Itertools;
    use rstest::rstest;
    use tempfile::tempdir;

    /// Read a CSV file back as rows of strings, header included
    fn read_rows(file_path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(file_path)
            .unwrap()
            .into_records()
            .map_ok(|record| record.iter().map(String::from).collect_vec())
            .try_collect()
            .unwrap()
    }

    #[rstest]
    fn test_write_csv(mut simple_plant: Plant, simple_plan: Plan) {
        let mut realised = simple_plan.clone();
        realised.insert(
            PlanKey::edge("sup", "mac"),
            PlanValue::Vector(vec![1.0, 0.0, 3.0]),
        );
        realised.insert(
            PlanKey::edge("mac", "cus"),
            PlanValue::Vector(vec![1.0, 0.0, 3.0]),
        );
        realised.insert(
            PlanKey::machine("mac"),
            PlanValue::Vector(vec![1.0, f64::NAN, 3.0]),
        );
        let output = simple_plant
            .run(&simple_plan, follow_plan(realised), 0)
            .unwrap();

        // Write the tables and read them back
        let dir = tempdir().unwrap();
        output.write_csv(dir.path()).unwrap();

        assert_eq!(
            read_rows(&dir.path().join(STATES_FILE_NAME)),
            [
                vec!["time", "mac"],
                vec!["0", "1"],
                vec!["1", ""],
                vec!["2", "3"]
            ]
        );
        assert_eq!(
            read_rows(&dir.path().join(FLOWS_FILE_NAME))[0],
            ["time", "sup -> mac", "mac -> cus"]
        );
        assert_eq!(
            read_rows(&dir.path().join(STORAGE_FILE_NAME)),
            [["time"], ["0"], ["1"], ["2"]]
        );
    }

    #[rstest]
    fn test_write_entities_json(simple_plant: Plant) {
        let dir = tempdir().unwrap();
        write_entities_json(dir.path(), &simple_plant).unwrap();

        let contents = fs::read_to_string(dir.path().join(ENTITIES_FILE_NAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(value["edges"][0]["source"], "sup");
        // Infinite bounds can't be represented in JSON
        assert!(value["edges"][0]["max_flow"].is_null());
    }

    #[test]
    fn test_create_output_directory() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("results");

        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());

        // A non-empty folder is only replaced on request
        fs::write(output_dir.join("flows.csv"), "").unwrap();
        assert!(create_output_directory(&output_dir, false).is_err());
        assert!(create_output_directory(&output_dir, true).unwrap());
        assert!(fs::read_dir(&output_dir).unwrap().next().is_none());
    }

    #[test]
    fn test_get_output_dir() {
        let dir = tempdir().unwrap();
        let model_dir = dir.path().join("simple");
        fs::create_dir(&model_dir).unwrap();

        assert_eq!(
            get_output_dir(&model_dir).unwrap(),
            PathBuf::from("plantsim_results/simple")
        );
    }
}
