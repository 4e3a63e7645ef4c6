//! ENS subgraph entity declarations
//!
//! Each module declares one entity type of the legacy ENS subgraph and how it
//! sits on the relational store. [definitions] feeds them all to the mapper.

pub mod account;
pub mod domain;
pub mod registration;
pub mod resolver;
pub mod wrapped_domain;

use super::orm::EntityDef;

/// Every entity exposed by the endpoint.
pub fn definitions() -> Vec<EntityDef> {
    vec![
        domain::definition(),
        account::definition(),
        resolver::definition(),
        registration::definition(),
        wrapped_domain::definition(),
    ]
}
