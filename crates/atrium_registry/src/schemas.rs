//! Wire schemas of the instance synchronization protocol.

use atrium_protocol::{FieldType, SchemaError, SchemaHash, SchemaRegistry};

/// Schema hashes used on the registry room.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySchemas {
    /// Instance state snapshot, pushed by instances.
    pub instance_update: SchemaHash,
    /// Room create/destroy command, pushed back by the registry.
    pub instance_command: SchemaHash,
}

/// Defines the sync protocol schemas. Must run before the registry room
/// is assembled so the router can validate them at mount time.
pub fn define_registry_schemas(registry: &SchemaRegistry) -> Result<RegistrySchemas, SchemaError> {
    let instance_update = registry.define([
        ("name", FieldType::STRING),
        ("namespace", FieldType::STRING),
        ("types", FieldType::STRING_ARRAY),
        ("rooms", FieldType::STRING_ARRAY),
        ("endpointUrl", FieldType::STRING),
    ])?;
    let instance_command = registry.define([
        ("command", FieldType::STRING),
        ("roomId", FieldType::STRING),
        ("type", FieldType::STRING),
    ])?;
    Ok(RegistrySchemas {
        instance_update,
        instance_command,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_follow_the_well_known_entries() {
        let registry = SchemaRegistry::new();
        let schemas = define_registry_schemas(&registry).unwrap();
        assert_eq!(schemas.instance_update, SchemaHash(0x0002));
        assert_eq!(schemas.instance_command, SchemaHash(0x0003));
        let update = registry.get(schemas.instance_update).unwrap();
        assert_eq!(update.fields()[4].0, "endpointUrl");
    }
}
