pub mod cache;
pub mod config;
pub mod hawkeye;
pub mod io;
pub mod memtracer;
pub mod processor;
pub mod replacement_policies;
pub mod simulator;
// Generated from the build script
mod hex {
    include!(concat!(env!("OUT_DIR"), "/hex.rs"));
}
#[cfg(test)]
mod test;
