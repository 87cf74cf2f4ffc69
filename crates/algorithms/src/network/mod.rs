//! Flow network rooted at an outlet
//!
//! Inverts a D8 direction grid from a chosen outlet into a tree of channel
//! nodes. Nodes live in an arena (`Vec<FlowNetworkNode>`) and refer to each
//! other by index; node 0 is the outlet. Construction and every traversal
//! use explicit stacks, so channel length is bounded only by memory.
//!
//! Per-node quantities:
//!
//! ```text
//! L(node)   = L(parent)   + distance_scale(node) * dx̄(row)
//! chi(node) = chi(parent) + (A0 / area(node))^θ * distance_scale(node) * dx̄(row)
//! ```
//!
//! where `dx̄` is the mean metric pixel dimension and `A0 = x0²`. Both are 0
//! at the outlet.
//!
//! Reference:
//! Perron, J. T., & Royden, L. (2013). An integral approach to bedrock river
//! profile analysis. *Earth Surface Processes and Landforms*, 38(6), 570–576.

use std::sync::Arc;

use chiflow_core::raster::{d8, GeoReference, GridAccessor, Raster};
use chiflow_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Index of a node in a [`FlowNetwork`]
pub type NodeId = usize;

/// Chi integration parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChiParams {
    /// Channel-initiation length scale in metres; `A0 = x0²`
    pub x0: f64,
    /// Concavity index
    pub theta: f64,
}

impl Default for ChiParams {
    fn default() -> Self {
        Self { x0: 500.0, theta: 0.5 }
    }
}

impl ChiParams {
    /// Reference drainage area `A0 = x0²`
    pub fn reference_area(&self) -> f64 {
        self.x0 * self.x0
    }

    /// Chi increment over one step
    pub(crate) fn increment(&self, area: f64, step: f64) -> f64 {
        (self.reference_area() / area).powf(self.theta) * step
    }
}

/// One channel cell of the network
#[derive(Debug, Clone, PartialEq)]
pub struct FlowNetworkNode {
    pub cell: (usize, usize),
    /// Contributing area, square metres
    pub area: f64,
    pub elevation: f64,
    /// 1 for a cardinal step to the parent, √2 for a diagonal one, 0 at the outlet
    pub distance_scale: f64,
    pub parent: Option<NodeId>,
    /// Upstream neighbours, clockwise from east around this cell
    pub children: Vec<NodeId>,
}

/// Per-node attribute selectable with [`FlowNetwork::profile_values`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    Area,
    Elevation,
    DistanceScale,
    Row,
    Col,
}

/// Index-aligned chi / elevation pairs along the channelised network
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelProfile {
    pub chi: Vec<f64>,
    /// Elevation above the base elevation
    pub elevation: Vec<f64>,
}

impl ChannelProfile {
    pub fn len(&self) -> usize {
        self.chi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chi.is_empty()
    }
}

/// Tree of channel nodes draining to one outlet
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    nodes: Vec<FlowNetworkNode>,
    georef: Arc<GeoReference>,
}

impl FlowNetwork {
    /// Build the network draining to `outlet`.
    ///
    /// A neighbour joins the tree when its direction points at the current
    /// cell and both its area and elevation hold data. Neighbours are
    /// scanned clockwise from east, which fixes the order of `children`.
    ///
    /// # Errors
    /// - [`Error::SizeMismatch`] if the three grids differ in shape
    /// - [`Error::IndexOutOfBounds`] if `outlet` lies outside the grid
    /// - [`Error::InvalidParameter`] if the outlet has no area or elevation
    /// - [`Error::Algorithm`] if a cell would be reached twice
    pub fn build(
        direction: &Raster<u8>,
        area: &Raster<f64>,
        elevation: &Raster<f64>,
        outlet: (usize, usize),
    ) -> Result<Self> {
        direction.ensure_same_shape(area)?;
        direction.ensure_same_shape(elevation)?;

        let (row, col) = outlet;
        let outlet_area = area.get(row, col)?;
        let outlet_elevation = elevation.get(row, col)?;
        if area.is_nodata(outlet_area) || elevation.is_nodata(outlet_elevation) {
            return Err(Error::invalid_parameter(
                "outlet",
                format!("({}, {})", row, col),
                "outlet cell holds no data",
            ));
        }

        let (rows, cols) = direction.shape();
        let mut visited = vec![false; rows * cols];
        visited[row * cols + col] = true;

        let mut nodes = vec![FlowNetworkNode {
            cell: outlet,
            area: outlet_area,
            elevation: outlet_elevation,
            distance_scale: 0.0,
            parent: None,
            children: Vec::new(),
        }];

        let mut stack: Vec<NodeId> = vec![0];
        while let Some(id) = stack.pop() {
            let (r, c) = nodes[id].cell;

            for n in direction.neighbors(r, c) {
                let code = unsafe { direction.get_unchecked(n.row, n.col) };
                if code != d8::opposite(n.direction) {
                    continue;
                }
                let (Some(a), Some(z)) = (
                    area.value_at(n.row as isize, n.col as isize),
                    elevation.value_at(n.row as isize, n.col as isize),
                ) else {
                    continue;
                };

                let flat = n.row * cols + n.col;
                if visited[flat] {
                    return Err(Error::Algorithm(format!(
                        "cell ({}, {}) reached twice while building the flow network",
                        n.row, n.col
                    )));
                }
                visited[flat] = true;

                let child = nodes.len();
                nodes.push(FlowNetworkNode {
                    cell: (n.row, n.col),
                    area: a,
                    elevation: z,
                    distance_scale: n.distance,
                    parent: Some(id),
                    children: Vec::new(),
                });
                nodes[id].children.push(child);
                stack.push(child);
            }
        }

        debug!(outlet = ?outlet, nodes = nodes.len(), "flow network built");

        Ok(Self {
            nodes,
            georef: Arc::clone(direction.georef()),
        })
    }

    /// Outlet node
    pub fn root(&self) -> &FlowNetworkNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNetworkNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[FlowNetworkNode] {
        &self.nodes
    }

    /// Number of nodes, outlet included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a network holds at least its outlet
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Grid cells of the network, in node order
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.nodes.iter().map(|n| n.cell)
    }

    pub fn georef(&self) -> &Arc<GeoReference> {
        &self.georef
    }

    fn step_length(&self, node: &FlowNetworkNode) -> f64 {
        node.distance_scale * self.georef.mean_pixel_dimension(node.cell.0)
    }

    /// Along-channel distance from the outlet, per node.
    ///
    /// Parents always precede their children in the arena, so one forward
    /// pass sees every parent's value first.
    pub fn flow_length(&self) -> Vec<f64> {
        let mut length = vec![0.0; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(p) = node.parent {
                length[id] = length[p] + self.step_length(node);
            }
        }
        length
    }

    /// Chi per node, integrated over every node regardless of area
    pub fn chi(&self, params: ChiParams) -> Vec<f64> {
        let mut chi = vec![0.0; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(p) = node.parent {
                chi[id] = chi[p] + params.increment(node.area, self.step_length(node));
            }
        }
        chi
    }

    /// Channel nodes in depth-first pre-order, children clockwise from east.
    ///
    /// Only nodes with `area >= A0` are visited, and the walk never descends
    /// past a node below the threshold.
    pub fn channel_nodes(&self, x0: f64) -> Vec<NodeId> {
        let threshold = x0 * x0;
        let mut order = Vec::new();
        if self.nodes[0].area < threshold {
            return order;
        }

        let mut stack: Vec<NodeId> = vec![0];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(
                self.nodes[id]
                    .children
                    .iter()
                    .rev()
                    .copied()
                    .filter(|&c| self.nodes[c].area >= threshold),
            );
        }
        order
    }

    /// Chi / elevation profile of the channel nodes.
    ///
    /// Elevations are given relative to `base_elevation`, usually the
    /// outlet's.
    pub fn channel_profile(&self, params: ChiParams, base_elevation: f64) -> ChannelProfile {
        let chi = self.chi(params);
        let order = self.channel_nodes(params.x0);
        ChannelProfile {
            chi: order.iter().map(|&id| chi[id]).collect(),
            elevation: order
                .iter()
                .map(|&id| self.nodes[id].elevation - base_elevation)
                .collect(),
        }
    }

    /// Requested attributes of every channel node, in channel-node order
    pub fn profile_values(&self, x0: f64, fields: &[NodeField]) -> Vec<Vec<f64>> {
        self.channel_nodes(x0)
            .into_iter()
            .map(|id| {
                let node = &self.nodes[id];
                fields
                    .iter()
                    .map(|f| match f {
                        NodeField::Area => node.area,
                        NodeField::Elevation => node.elevation,
                        NodeField::DistanceScale => node.distance_scale,
                        NodeField::Row => node.cell.0 as f64,
                        NodeField::Col => node.cell.1 as f64,
                    })
                    .collect()
            })
            .collect()
    }

    /// Paint per-node values onto a grid of the network's footprint; NaN
    /// everywhere else.
    ///
    /// # Errors
    /// [`Error::SizeMismatch`] if `values` is not one value per node.
    pub fn to_raster(&self, values: &[f64]) -> Result<Raster<f64>> {
        if values.len() != self.nodes.len() {
            return Err(Error::SizeMismatch {
                er: self.nodes.len(),
                ec: 1,
                ar: values.len(),
                ac: 1,
            });
        }
        let mut out = Raster::with_georef(Arc::clone(&self.georef), f64::NAN);
        for (node, &v) in self.nodes.iter().zip(values) {
            out.set(node.cell.0, node.cell.1, v)?;
        }
        Ok(out)
    }
}
