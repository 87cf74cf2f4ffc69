//! # chiflow algorithms
//!
//! Grid-graph hydrology and river-profile analysis for chiflow.
//!
//! ## Modules
//!
//! - **hydrology**: depression filling, D8 routing, flow accumulation,
//!   grid-wide chi / flow length / relief
//! - **network**: flow-network tree rooted at an outlet, channel profiles
//! - **calibration**: `k_s` and concavity fitting of chi-elevation profiles
//!
//! ## Pipeline
//!
//! ```ignore
//! use chiflow_algorithms::prelude::*;
//!
//! let filled = priority_flood(&dem, PriorityFloodParams { agg_slope: 1e-4 })?;
//! let routing = d8_flow(&filled, D8Params::default())?;
//! let network = FlowNetwork::build(&routing.direction, &routing.area, &filled, outlet)?;
//! let fit = calibrate(&network, CalibrationParams::default());
//! ```

pub mod calibration;
pub mod hydrology;
pub mod network;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::calibration::{
        calibrate, fit_ks, fit_ks_with_r2, uninformative_ss, Calibration, CalibrationParams, KsFit,
    };
    pub use crate::hydrology::{
        chi_grid, d8_flow, flow_accumulation, flow_direction, flow_length_grid, priority_flood,
        priority_flood_flat, relief_grid, scaled_relief_grid, D8Params, D8Routing,
        FlowAccumulation, FlowDirection, PriorityFlood, PriorityFloodParams,
    };
    pub use crate::network::{ChannelProfile, ChiParams, FlowNetwork, FlowNetworkNode, NodeField};
    pub use chiflow_core::prelude::*;
}
