//! The closed set of relations the asset enrichment follows.

/// Hardware components attached to an asset through `Item_Device*` relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    GraphicCard,
    Processor,
    Memory,
}

/// How to find a component's device id starting from the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub component: Component,
    /// Sub-resource listing the attached instances, `{asset}/{id}/{relation}`.
    pub relation: &'static str,
    /// Foreign key on each relation row pointing at the device.
    pub foreign_id_field: &'static str,
    /// Field on the asset itself used when the relation yields nothing.
    pub fallback_field: &'static str,
    /// Resource holding the device details.
    pub device_resource: &'static str,
}

pub static RELATIONSHIPS: [RelationshipDescriptor; 3] = [
    RelationshipDescriptor {
        component: Component::GraphicCard,
        relation: "Item_DeviceGraphicCard",
        foreign_id_field: "devicegraphiccards_id",
        fallback_field: "items_id_devicegraphiccards",
        device_resource: "DeviceGraphicCard",
    },
    RelationshipDescriptor {
        component: Component::Processor,
        relation: "Item_DeviceProcessor",
        foreign_id_field: "deviceprocessors_id",
        fallback_field: "items_id_deviceprocessors",
        device_resource: "DeviceProcessor",
    },
    RelationshipDescriptor {
        component: Component::Memory,
        relation: "Item_DeviceMemory",
        foreign_id_field: "devicememories_id",
        fallback_field: "items_id_devicememories",
        device_resource: "DeviceMemory",
    },
];

impl Component {
    pub fn descriptor(self) -> &'static RelationshipDescriptor {
        match self {
            Component::GraphicCard => &RELATIONSHIPS[0],
            Component::Processor => &RELATIONSHIPS[1],
            Component::Memory => &RELATIONSHIPS[2],
        }
    }
}

/// One-to-one lookups resolved from an id carried by the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lookup {
    Model,
    Type,
    State,
    Manufacturer,
    Location,
    /// The first attached device of a component kind.
    Device(Component),
}

pub const LOOKUPS: [Lookup; 8] = [
    Lookup::Model,
    Lookup::Type,
    Lookup::State,
    Lookup::Manufacturer,
    Lookup::Location,
    Lookup::Device(Component::GraphicCard),
    Lookup::Device(Component::Processor),
    Lookup::Device(Component::Memory),
];

impl Lookup {
    pub fn resource(self) -> &'static str {
        match self {
            Lookup::Model => "ComputerModel",
            Lookup::Type => "ComputerType",
            Lookup::State => "State",
            Lookup::Manufacturer => "Manufacturer",
            Lookup::Location => "Location",
            Lookup::Device(c) => c.descriptor().device_resource,
        }
    }

    /// Field on the (pointer-resolved) asset holding the id to look up.
    pub fn id_field(self) -> &'static str {
        match self {
            Lookup::Model => "computermodels_id",
            Lookup::Type => "computertypes_id",
            Lookup::State => "states_id",
            Lookup::Manufacturer => "manufacturers_id",
            Lookup::Location => "locations_id",
            Lookup::Device(c) => c.descriptor().foreign_id_field,
        }
    }
}

/// Custom fields kept by the Fields plugin, one row per asset.
pub const PLUGIN_FIELDS_RESOURCE: &str = "PluginFieldsComputerFichetest";
