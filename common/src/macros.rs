/// Declares a uuid-backed identifier newtype.
///
/// The generated type is `Copy`, ordered, hashable and serializes as the bare uuid string, so ids
/// stay stable across YAML/JSON round trips of a schematic.
#[macro_export]
macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Ord,
            PartialOrd,
            Debug,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn unique() -> $name {
                $name(uuid::Uuid::new_v4())
            }
            pub fn nil() -> $name {
                $name(uuid::Uuid::nil())
            }
            pub const fn from_u128(value: u128) -> $name {
                $name(uuid::Uuid::from_u128(value))
            }
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
            pub fn as_uuid(&self) -> uuid::Uuid {
                self.0
            }
            /// First uuid group, enough to tell ids apart in log lines.
            pub fn short(&self) -> String {
                let mut text = self.0.simple().to_string();
                text.truncate(8);
                text
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> $name {
                $name(uuid)
            }
        }

        impl From<u128> for $name {
            fn from(value: u128) -> $name {
                $name::from_u128(value)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(id: &str) -> std::result::Result<$name, Self::Err> {
                Ok($name(uuid::Uuid::parse_str(id)?))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Default for $name {
            fn default() -> $name {
                $name::nil()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    id_type!(TestId);

    #[test]
    fn id_roundtrips_through_string() {
        let id = TestId::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        let parsed: TestId = id.to_string().parse().unwrap();

        assert_eq!(id, parsed);
        assert_eq!(id.short(), "12345678");
        assert!(!id.is_nil());
        assert!(TestId::default().is_nil());
    }
}
