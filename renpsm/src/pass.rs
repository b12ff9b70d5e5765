pub mod sim_to_rust;
