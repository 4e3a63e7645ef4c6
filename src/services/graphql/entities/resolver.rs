//! `Resolver`: a resolver contract as attached to one domain.

use crate::services::graphql::orm::{EntityDef, ForeignKey, Nullability, ScalarKind};

use Nullability::{Optional, Required};

pub fn definition() -> EntityDef {
    EntityDef::new("Resolver", "resolvers")
        .field("id", "id", ScalarKind::String, Required)
        .field("address", "address", ScalarKind::Bytes, Required)
        .field("contentHash", "content_hash", ScalarKind::Bytes, Optional)
        .to_one("domain", "Domain", ForeignKey::Parent("domain_id".into()), Optional)
        .to_one("addr", "Account", ForeignKey::Parent("addr_id".into()), Optional)
}
