use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        pub struct $name(pub $inner);

        impl $name {
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Low part of a player, creature or game object guid.
    EntityId(u64)
);
numeric_id!(
    /// Identifier of a world map (continent, dungeon, battleground).
    MapId(u32)
);
numeric_id!(
    /// Identifier of a zone inside a map.
    ZoneId(u32)
);
numeric_id!(
    /// Identifier of a layer within one map. Layer 0 is the permanent base layer.
    LayerId(u32)
);
numeric_id!(
    /// 1-based identifier of a spatial partition within one map.
    PartitionId(u32)
);
numeric_id!(
    /// Spawn definition id from world content.
    SpawnId(u64)
);
numeric_id!(
    /// Live instance of a map.
    InstanceId(u32)
);
numeric_id!(
    /// Creature or game object template entry.
    TemplateId(u32)
);

impl LayerId {
    /// The base layer. Exists for every populated map and is never destroyed.
    pub const BASE: LayerId = LayerId(0);

    pub const fn is_base(self) -> bool {
        self.0 == 0
    }

    pub const fn next(self) -> LayerId {
        LayerId(self.0 + 1)
    }
}

impl PartitionId {
    /// Resolution target whenever partitioning is off for a map.
    pub const FIRST: PartitionId = PartitionId(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_numerically() {
        let mut layers = vec![LayerId(3), LayerId::BASE, LayerId(1)];
        layers.sort();
        assert_eq!(layers, vec![LayerId(0), LayerId(1), LayerId(3)]);
    }

    #[test]
    fn base_layer_and_next() {
        assert!(LayerId::BASE.is_base());
        assert_eq!(LayerId::BASE.next(), LayerId(1));
        assert!(!LayerId(2).is_base());
    }

    #[test]
    fn display_is_bare_number() {
        assert_eq!(MapId(571).to_string(), "571");
        assert_eq!(PartitionId::FIRST.to_string(), "1");
    }
}
