//! Administrative subcommands for the `memstore` binary.

pub mod doctor;
