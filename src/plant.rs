//! The plant: a network of nodes connected by commodity-typed edges.
//!
//! A plant is built incrementally with the `add_*` methods, each of which validates the new node
//! and the edges from its parents before changing anything. Once a simulation has started, the
//! topology is frozen.
use crate::commodity::{CommodityID, CommoditySet, EdgeEnds, resolve_edge_commodity};
use crate::edge::{Edge, EdgeBounds, EdgeKey, EdgeMap, EdgeView};
use crate::horizon::Horizon;
use crate::id::{NodeID, get_by_id};
use crate::node::{
    Client, ClientKind, Machine, MachineOptions, MachineView, Node, NodeKind, NodeView,
    Predictions, Setpoint, Storage, StorageOptions, StorageView, Supplier, SupplierView,
};
use crate::output::SimulationOutput;
use crate::plan::Plan;
use crate::simulation::PlantSnapshot;
use crate::variance::VarianceModel;
use anyhow::{Context, Result, bail, ensure};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use strum::IntoEnumIterator;

/// The stages in the life of a plant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum RunStatus {
    /// The topology can still be changed
    #[default]
    NotStarted,
    /// A simulation is in progress (or was aborted by an error)
    Running,
    /// The simulation ran to the end of the horizon
    Completed,
}

/// Selects edges by their source, destination and commodity.
///
/// An empty filter matches every edge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeFilter {
    sources: Option<IndexSet<NodeID>>,
    destinations: Option<IndexSet<NodeID>>,
    commodities: Option<IndexSet<CommodityID>>,
}

impl EdgeFilter {
    /// Also accept edges starting from the given node
    pub fn source(mut self, name: &str) -> Self {
        self.sources
            .get_or_insert_with(IndexSet::new)
            .insert(name.into());
        self
    }

    /// Also accept edges ending in the given node
    pub fn destination(mut self, name: &str) -> Self {
        self.destinations
            .get_or_insert_with(IndexSet::new)
            .insert(name.into());
        self
    }

    /// Also accept edges carrying the given commodity
    pub fn commodity(mut self, commodity: &str) -> Self {
        self.commodities
            .get_or_insert_with(IndexSet::new)
            .insert(commodity.into());
        self
    }

    fn matches(&self, edge: &Edge) -> bool {
        let key = edge.key();
        self.sources
            .as_ref()
            .is_none_or(|sources| sources.contains(&key.source))
            && self
                .destinations
                .as_ref()
                .is_none_or(|destinations| destinations.contains(&key.destination))
            && self
                .commodities
                .as_ref()
                .is_none_or(|commodities| commodities.contains(edge.commodity()))
    }
}

/// A production plant
#[derive(Clone, Debug)]
pub struct Plant {
    horizon: Horizon,
    nodes: IndexMap<NodeID, Node>,
    edges: EdgeMap,
    status: RunStatus,
}

impl Plant {
    /// Create an empty plant simulated over the given horizon
    pub fn new(horizon: Horizon) -> Self {
        Self {
            horizon,
            nodes: IndexMap::new(),
            edges: EdgeMap::new(),
            status: RunStatus::default(),
        }
    }

    /// Create an empty plant simulated over `len` steps labelled `0..len`
    pub fn with_length(len: i64) -> Result<Self> {
        Ok(Self::new(Horizon::new(len)?))
    }

    /// The horizon of the plant
    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    /// Whether the plant has been simulated
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// All commodities accepted or produced by the nodes of the plant
    pub fn commodities(&self) -> CommoditySet {
        let mut commodities = CommoditySet::new();
        for node in self.nodes.values() {
            commodities.extend(node.commodity_in().cloned());
            commodities.extend(node.commodities_out().iter().cloned());
        }

        commodities
    }

    /// Add a supplier, which has no parents.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique name of the node
    /// * `commodity` - The commodity supplied
    /// * `prices` - Predicted selling prices over the horizon
    /// * `variance` - Deviation of the realised prices from the predictions
    pub fn add_supplier(
        &mut self,
        name: &str,
        commodity: &str,
        prices: impl Into<Predictions>,
        variance: VarianceModel,
    ) -> Result<SupplierView> {
        let supplier = Supplier::new(
            name.into(),
            commodity.into(),
            prices.into(),
            variance,
            &self.horizon,
        )?;
        let view = supplier.exposed();
        self.insert_node(Node::Supplier(supplier), &[], EdgeBounds::default())?;

        Ok(view)
    }

    /// Add a customer or a purchaser fed by the given parents.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique name of the node
    /// * `kind` - Whether the client is a customer or a purchaser
    /// * `commodity` - The commodity bought
    /// * `parents` - Names of the nodes supplying the client
    /// * `predictions` - Predicted demands (customer) or buying prices (purchaser)
    /// * `variance` - Deviation of the realised values from the predictions
    /// * `bounds` - Flow bounds of the edges from the parents
    #[allow(clippy::too_many_arguments)]
    pub fn add_client(
        &mut self,
        name: &str,
        kind: ClientKind,
        commodity: &str,
        parents: &[&str],
        predictions: impl Into<Predictions>,
        variance: VarianceModel,
        bounds: EdgeBounds,
    ) -> Result<NodeView> {
        let client = Client::new(
            name.into(),
            kind,
            commodity.into(),
            predictions.into(),
            variance,
            &self.horizon,
        )?;
        let view = client.exposed();
        self.insert_node(Node::Client(client), parents, bounds)?;

        Ok(view)
    }

    /// Add a machine fed by the given parents.
    ///
    /// The output commodities of the machine are the columns of its setpoint table.
    pub fn add_machine(
        &mut self,
        name: &str,
        commodity: &str,
        parents: &[&str],
        setpoint: Setpoint,
        options: MachineOptions,
        bounds: EdgeBounds,
    ) -> Result<MachineView> {
        let machine = Machine::new(
            name.into(),
            commodity.into(),
            setpoint,
            options,
            &self.horizon,
        )?;
        let view = machine.exposed();
        self.insert_node(Node::Machine(machine), parents, bounds)?;

        Ok(view)
    }

    /// Add a storage fed by the given parents
    pub fn add_storage(
        &mut self,
        name: &str,
        commodity: &str,
        parents: &[&str],
        options: StorageOptions,
        bounds: EdgeBounds,
    ) -> Result<StorageView> {
        let storage = Storage::new(name.into(), commodity.into(), options, &self.horizon)?;
        let view = storage.exposed();
        self.insert_node(Node::Storage(storage), parents, bounds)?;

        Ok(view)
    }

    /// Connect two existing nodes.
    ///
    /// # Arguments
    ///
    /// * `source` - Name of the node the flow comes from
    /// * `destination` - Name of the node the flow goes to
    /// * `commodity` - The commodity carried, which defaults to the input of the destination
    /// * `bounds` - Flow bounds of the edge
    pub fn add_edge(
        &mut self,
        source: &str,
        destination: &str,
        commodity: Option<&str>,
        bounds: EdgeBounds,
    ) -> Result<EdgeView> {
        self.ensure_not_started()?;
        ensure!(
            source != destination,
            "Node '{source}' cannot be connected to itself"
        );
        let source_node = get_by_id(&self.nodes, source, "source node")?;
        let destination_node = get_by_id(&self.nodes, destination, "destination node")?;
        let explicit = commodity.map(CommodityID::from);
        let edge = self.new_edge(source_node, destination_node, explicit.as_ref(), bounds)?;
        let view = edge.exposed();

        debug!("Adding edge {}", edge.key());
        self.edges.insert(edge.key().clone(), edge);

        Ok(view)
    }

    /// Check the topology, then insert a node together with the edges from its parents
    fn insert_node(&mut self, node: Node, parents: &[&str], bounds: EdgeBounds) -> Result<()> {
        self.ensure_not_started()?;
        if let Some(existing) = self.nodes.get(node.name()) {
            bail!(
                "There is already a {} node '{}', please use another identifier",
                existing.kind(),
                node.name()
            );
        }
        // Only suppliers are roots of the network
        if node.kind() != NodeKind::Supplier {
            ensure!(
                !parents.is_empty(),
                "{} node must have at least one parent",
                node.kind().title()
            );
        }

        // Build every edge first, so a bad parent leaves the plant unchanged
        let mut edges = Vec::with_capacity(parents.len());
        for &parent in parents {
            let source = self
                .nodes
                .get(parent)
                .with_context(|| format!("Parent node '{parent}' has not been added yet"))?;
            let edge = self.new_edge(source, &node, None, bounds)?;
            // The same parent may be listed twice
            ensure!(
                !edges.iter().any(|e: &Edge| e.key() == edge.key()),
                "There is already an edge {}",
                edge.key()
            );
            edges.push(edge);
        }

        debug!("Adding {} node '{}'", node.kind(), node.name());
        self.nodes.insert(node.name().clone(), node);
        for edge in edges {
            debug!("Adding edge {}", edge.key());
            self.edges.insert(edge.key().clone(), edge);
        }

        Ok(())
    }

    /// Create an edge between two nodes, resolving the commodity it carries
    fn new_edge(
        &self,
        source: &Node,
        destination: &Node,
        commodity: Option<&CommodityID>,
        bounds: EdgeBounds,
    ) -> Result<Edge> {
        let key = EdgeKey {
            source: source.name().clone(),
            destination: destination.name().clone(),
        };
        ensure!(
            !self.edges.contains_key(&key),
            "There is already an edge {key}"
        );
        let ends = EdgeEnds {
            source: source.name(),
            source_outputs: source.commodities_out(),
            destination: destination.name(),
            destination_input: destination.commodity_in(),
        };
        let commodity = resolve_edge_commodity(&ends, commodity)?;

        Edge::new(key, commodity, bounds, self.horizon.clone())
    }

    fn ensure_not_started(&self) -> Result<()> {
        ensure!(
            self.status == RunStatus::NotStarted,
            "The plant cannot be modified once the simulation has started"
        );

        Ok(())
    }

    /// A copy of the node with the given name
    pub fn node(&self, name: &str) -> Result<NodeView> {
        Ok(get_by_id(&self.nodes, name, "node")?.exposed())
    }

    /// Copies of all nodes, in insertion order
    pub fn nodes(&self) -> IndexMap<NodeID, NodeView> {
        self.nodes
            .iter()
            .map(|(name, node)| (name.clone(), node.exposed()))
            .collect()
    }

    /// Copies of all nodes, grouped by kind
    pub fn nodes_by_kind(&self) -> IndexMap<NodeKind, IndexMap<NodeID, NodeView>> {
        NodeKind::iter()
            .map(|kind| {
                let nodes = self
                    .nodes
                    .iter()
                    .filter(|(_, node)| node.kind() == kind)
                    .map(|(name, node)| (name.clone(), node.exposed()))
                    .collect();
                (kind, nodes)
            })
            .collect()
    }

    /// Copies of all suppliers
    pub fn suppliers(&self) -> IndexMap<NodeID, SupplierView> {
        self.nodes
            .iter()
            .filter_map(|(name, node)| match node {
                Node::Supplier(supplier) => Some((name.clone(), supplier.exposed())),
                _ => None,
            })
            .collect()
    }

    /// Copies of all customers and purchasers
    pub fn clients(&self) -> IndexMap<NodeID, NodeView> {
        self.nodes
            .iter()
            .filter_map(|(name, node)| match node {
                Node::Client(client) => Some((name.clone(), client.exposed())),
                _ => None,
            })
            .collect()
    }

    /// Copies of all machines
    pub fn machines(&self) -> IndexMap<NodeID, MachineView> {
        self.nodes
            .iter()
            .filter_map(|(name, node)| match node {
                Node::Machine(machine) => Some((name.clone(), machine.exposed())),
                _ => None,
            })
            .collect()
    }

    /// Copies of all storages
    pub fn storages(&self) -> IndexMap<NodeID, StorageView> {
        self.nodes
            .iter()
            .filter_map(|(name, node)| match node {
                Node::Storage(storage) => Some((name.clone(), storage.exposed())),
                _ => None,
            })
            .collect()
    }

    /// A copy of the edge between the given nodes
    pub fn edge(&self, source: &str, destination: &str) -> Result<EdgeView> {
        let key = EdgeKey::new(source, destination);
        self.edges
            .get(&key)
            .map(Edge::exposed)
            .with_context(|| format!("Unknown edge {key}"))
    }

    /// Copies of the edges selected by the filter
    pub fn edges(&self, filter: &EdgeFilter) -> IndexMap<EdgeKey, EdgeView> {
        self.edges
            .iter()
            .filter(|(_, edge)| filter.matches(edge))
            .map(|(key, edge)| (key.clone(), edge.exposed()))
            .collect()
    }

    /// Names of all machines, i.e. the nodes which need a state in a plan
    pub fn machine_names(&self) -> IndexSet<NodeID> {
        self.nodes
            .values()
            .filter(|node| node.kind() == NodeKind::Machine)
            .map(|node| node.name().clone())
            .collect()
    }

    /// Keys of all edges, i.e. the edges which need a flow in a plan
    pub fn edge_keys(&self) -> IndexSet<EdgeKey> {
        self.edges.keys().cloned().collect()
    }

    /// Check that every commodity accepted by a node can flow in, and every commodity produced
    /// by a node can flow out
    pub fn validate(&self) -> Result<()> {
        for node in self.nodes.values() {
            let name = node.name();

            // Suppliers have no input
            if let Some(commodity) = node.commodity_in() {
                ensure!(
                    self.edges.values().any(|edge| &edge.key().destination == name
                        && edge.commodity() == commodity),
                    "Input commodity {commodity} has no valid ingoing edge in node {name}"
                );
            }
            for commodity in node.commodities_out() {
                ensure!(
                    self.edges.values().any(
                        |edge| &edge.key().source == name && edge.commodity() == commodity
                    ),
                    "Output commodity {commodity} has no valid outgoing edge in node {name}"
                );
            }
        }

        Ok(())
    }

    /// Simulate the plant over its horizon.
    ///
    /// A plant can only be run once.
    ///
    /// # Arguments
    ///
    /// * `plan` - The predicted flows and states
    /// * `recourse` - Decides the realised flows and states at each step
    /// * `seed` - Seed of the random number generator driving the variance models
    pub fn run<R>(&mut self, plan: &Plan, recourse: R, seed: u64) -> Result<SimulationOutput>
    where
        R: FnMut(usize, &PlantSnapshot) -> Result<Plan>,
    {
        crate::simulation::run(self, plan, recourse, seed)
    }

    /// Move to the running state, checking the topology
    pub(crate) fn start_run(&mut self) -> Result<()> {
        ensure!(self.status == RunStatus::NotStarted, "Simulation already run");

        // A failed run leaves the plant in the running state, so it can't be resumed
        self.validate()?;
        self.status = RunStatus::Running;

        Ok(())
    }

    pub(crate) fn finish_run(&mut self) {
        self.status = RunStatus::Completed;
    }

    /// Mutable access to the entities, for the simulation loop
    pub(crate) fn entities_mut(&mut self) -> (&mut IndexMap<NodeID, Node>, &mut EdgeMap) {
        (&mut self.nodes, &mut self.edges)
    }

    pub(crate) fn edges_map(&self) -> &EdgeMap {
        &self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, simple_plant};
    use rstest::rstest;

    #[rstest]
    fn test_plant_queries(simple_plant: Plant) {
        assert_eq!(
            simple_plant.commodities().into_iter().collect::<Vec<_>>(),
            [CommodityID::new("in"), CommodityID::new("out")]
        );
        assert_eq!(simple_plant.suppliers().len(), 1);
        assert_eq!(simple_plant.machines().len(), 1);
        assert_eq!(simple_plant.clients().len(), 1);
        assert!(simple_plant.storages().is_empty());
        assert_eq!(simple_plant.nodes().len(), 3);

        let by_kind = simple_plant.nodes_by_kind();
        assert_eq!(by_kind.len(), 4);
        assert!(by_kind[&NodeKind::Storage].is_empty());
        assert!(by_kind[&NodeKind::Supplier].contains_key("sup"));

        let edge = simple_plant.edge("mac", "cus").unwrap();
        assert_eq!(edge.commodity, CommodityID::new("out"));
        assert!(simple_plant.edge("cus", "mac").is_err());
        simple_plant.validate().unwrap();
    }

    #[rstest]
    fn test_edge_filter(simple_plant: Plant) {
        assert_eq!(simple_plant.edges(&EdgeFilter::default()).len(), 2);
        let edges = simple_plant.edges(&EdgeFilter::default().source("sup"));
        assert_eq!(
            edges.keys().collect::<Vec<_>>(),
            [&EdgeKey::new("sup", "mac")]
        );
        let edges = simple_plant.edges(&EdgeFilter::default().commodity("out"));
        assert_eq!(
            edges.keys().collect::<Vec<_>>(),
            [&EdgeKey::new("mac", "cus")]
        );
        assert!(
            simple_plant
                .edges(&EdgeFilter::default().source("sup").destination("cus"))
                .is_empty()
        );
    }

    #[rstest]
    fn test_name_collision(mut simple_plant: Plant) {
        assert_error!(
            simple_plant.add_supplier("sup", "in", 1.0, VarianceModel::zero()),
            "There is already a supplier node 'sup', please use another identifier"
        );
        assert_error!(
            simple_plant.add_storage(
                "mac",
                "in",
                &["sup"],
                StorageOptions::default(),
                EdgeBounds::default()
            ),
            "There is already a machine node 'mac', please use another identifier"
        );
    }

    #[rstest]
    fn test_unknown_parent(mut simple_plant: Plant) {
        assert_error!(
            simple_plant.add_client(
                "x",
                ClientKind::Customer,
                "out",
                &["nonexistent"],
                1.0,
                VarianceModel::zero(),
                EdgeBounds::default()
            ),
            "Parent node 'nonexistent' has not been added yet"
        );
        assert!(simple_plant.node("x").is_err());
    }

    #[rstest]
    fn test_no_parents(mut simple_plant: Plant) {
        assert_error!(
            simple_plant.add_client(
                "x",
                ClientKind::Purchaser,
                "out",
                &[],
                1.0,
                VarianceModel::zero(),
                EdgeBounds::default()
            ),
            "Client node must have at least one parent"
        );
    }

    #[rstest]
    fn test_parent_commodity_mismatch(mut simple_plant: Plant) {
        assert_error!(
            simple_plant.add_client(
                "x",
                ClientKind::Customer,
                "heat",
                &["mac"],
                1.0,
                VarianceModel::zero(),
                EdgeBounds::default()
            ),
            "Parent node 'mac' should return commodity 'heat', but it returns {'out'}"
        );
        // The plant is left unchanged
        assert_eq!(simple_plant.nodes().len(), 3);
    }

    #[rstest]
    fn test_duplicate_parent(mut simple_plant: Plant) {
        assert_error!(
            simple_plant.add_client(
                "x",
                ClientKind::Customer,
                "out",
                &["mac", "mac"],
                1.0,
                VarianceModel::zero(),
                EdgeBounds::default()
            ),
            "There is already an edge ('mac', 'x')"
        );
    }

    #[rstest]
    fn test_add_edge(mut simple_plant: Plant) {
        simple_plant
            .add_storage(
                "sto",
                "out",
                &["mac"],
                StorageOptions::default(),
                EdgeBounds::default(),
            )
            .unwrap();
        assert_error!(
            simple_plant.validate(),
            "Output commodity out has no valid outgoing edge in node sto"
        );

        // Connect the storage to the existing customer
        let edge = simple_plant
            .add_edge("sto", "cus", None, EdgeBounds::default())
            .unwrap();
        assert_eq!(edge.commodity, CommodityID::new("out"));
        simple_plant.validate().unwrap();

        assert_error!(
            simple_plant.add_edge("sto", "cus", None, EdgeBounds::default()),
            "There is already an edge ('sto', 'cus')"
        );
        assert_error!(
            simple_plant.add_edge("cus", "sto", None, EdgeBounds::default()),
            "Parent node 'cus' should return commodity 'out', but it returns set()"
        );
        assert_error!(
            simple_plant.add_edge("mac", "sup", None, EdgeBounds::default()),
            "Destination node 'sup' does not accept any input commodity, but it should"
        );
        assert_error!(
            simple_plant.add_edge("sto", "mac", Some("out"), EdgeBounds::default()),
            "Destination node 'mac' should accept commodity 'out', but it accepts 'in' only"
        );
        assert_error!(
            simple_plant.add_edge("sto", "unknown", None, EdgeBounds::default()),
            "Unknown destination node 'unknown'"
        );
    }

    #[rstest]
    fn test_invalid_edge_bounds(mut simple_plant: Plant) {
        let bounds = EdgeBounds {
            min_flow: -1.0,
            ..EdgeBounds::default()
        };
        assert_error!(
            simple_plant.add_client(
                "x",
                ClientKind::Purchaser,
                "out",
                &["mac"],
                1.0,
                VarianceModel::zero(),
                bounds
            ),
            "The minimum flow cannot be negative, got -1.0"
        );
    }

    #[rstest]
    fn test_plant_clone_is_independent(simple_plant: Plant) {
        // Deep copy, so the original is untouched
        let mut copy = simple_plant.clone();
        copy.add_supplier("sup2", "in", 1.0, VarianceModel::zero())
            .unwrap();
        assert_eq!(copy.nodes().len(), 4);
        assert_eq!(simple_plant.nodes().len(), 3);
    }
}
