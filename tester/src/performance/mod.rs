pub mod mixed_workload;
pub mod resize_under_load;
