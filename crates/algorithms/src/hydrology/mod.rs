//! Hydrological conditioning and routing
//!
//! Algorithms for D8 hydrology on Digital Elevation Models:
//! - Priority-Flood: O(n log n) depression filling (Barnes 2014)
//! - Flow direction: D8 single flow direction with drainage area
//! - Flow accumulation: metric contributing area from a direction grid
//! - Chi: grid-wide flow length, chi and relief per outlet

mod chi;
mod flow_accumulation;
pub(crate) mod flow_direction;
mod priority_flood;

pub use chi::{chi_grid, flow_length_grid, relief_grid, scaled_relief_grid};
pub use flow_accumulation::{flow_accumulation, flow_accumulation_within, FlowAccumulation};
pub use flow_direction::{
    convert_rivertools_directions, d8_area_slope, d8_flow, d8_slope, flow_direction, flow_target,
    trace_downstream, D8Params, D8Routing, FlowDirection,
};
pub use priority_flood::{
    priority_flood, priority_flood_flat, CellQueue, PriorityFlood, PriorityFloodParams,
    PriorityQueueEntry,
};
