pub mod dof_map;
pub mod geo_map;
pub mod layout;
