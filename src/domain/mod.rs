// Domain layer: the records flowing through a run and the ports the pipeline talks to.

pub mod model;
pub mod ports;
