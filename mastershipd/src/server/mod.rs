mod ingress;
#[cfg(test)]
mod ingress_test;
mod prom;

pub use ingress::{spawn_ingress_server, IngressState};
pub use prom::{spawn_prom_server, PromState};
