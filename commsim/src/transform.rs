use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use common::id_type;
use hashbrown::hash_map::{Entry, Values};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::param::{ParamTable, ResultRecord};
use crate::settings::RunSettings;
use crate::signal::{SignalDomain, SignalEnvelope};

id_type!(TransformId);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub domain: SignalDomain,
    #[serde(default)]
    pub optional: bool,
}

/// What a transform hands back for one execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformOutput {
    /// Routed by each envelope's `port` field, not by position in this list.
    pub outputs: Vec<SignalEnvelope>,
    pub params: ParamTable,
    pub results: Vec<ResultRecord>,
    /// Status text for the log sink.
    pub messages: Vec<String>,
}

pub trait TransformFn:
    Fn(&[Option<SignalEnvelope>], &ParamTable, &RunSettings) -> anyhow::Result<TransformOutput>
    + Send
    + Sync
    + 'static
{
}

impl<T> TransformFn for T where
    T: Fn(&[Option<SignalEnvelope>], &ParamTable, &RunSettings) -> anyhow::Result<TransformOutput>
        + Send
        + Sync
        + 'static
{
}

#[derive(Clone, Default)]
pub enum TransformLambda {
    #[default]
    None,
    Lambda(Arc<dyn TransformFn>),
}

#[derive(Clone, Debug, Default)]
pub struct TransformDef {
    pub id: TransformId,
    pub name: String,
    pub category: String,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub default_params: ParamTable,
    /// Output differs between runs with identical inputs unless seeded.
    pub randomized: bool,
    pub lambda: TransformLambda,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformLibError {
    #[error("Transform {name} ({id}) is already registered")]
    Duplicate { id: TransformId, name: String },
}

#[derive(Clone, Debug, Default)]
pub struct TransformLib {
    defs: hashbrown::HashMap<TransformId, TransformDef>,
}

impl Debug for TransformLambda {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformLambda::None => f.write_str("TransformLambda::None"),
            TransformLambda::Lambda(_) => f.write_str("TransformLambda::Lambda"),
        }
    }
}

impl TransformLambda {
    pub fn new<F>(lambda: F) -> Self
    where
        F: Fn(&[Option<SignalEnvelope>], &ParamTable, &RunSettings) -> anyhow::Result<TransformOutput>
            + Send
            + Sync
            + 'static,
    {
        TransformLambda::Lambda(Arc::new(lambda))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TransformLambda::None)
    }

    pub fn invoke(
        &self,
        inputs: &[Option<SignalEnvelope>],
        params: &ParamTable,
        settings: &RunSettings,
    ) -> anyhow::Result<TransformOutput> {
        match self {
            TransformLambda::None => anyhow::bail!("transform has no implementation"),
            TransformLambda::Lambda(inner) => (inner)(inputs, params, settings),
        }
    }
}

impl PortSpec {
    pub fn required(name: &str, domain: SignalDomain) -> Self {
        PortSpec {
            name: name.to_string(),
            domain,
            optional: false,
        }
    }

    pub fn optional(name: &str, domain: SignalDomain) -> Self {
        PortSpec {
            name: name.to_string(),
            domain,
            optional: true,
        }
    }
}

impl TransformDef {
    pub fn new(name: &str, category: &str) -> Self {
        TransformDef {
            id: TransformId::unique(),
            name: name.to_string(),
            category: category.to_string(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: TransformId) -> Self {
        self.id = id;
        self
    }

    pub fn input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn params(mut self, params: ParamTable) -> Self {
        self.default_params = params;
        self
    }

    pub fn randomized(mut self) -> Self {
        self.randomized = true;
        self
    }

    pub fn lambda<F>(mut self, lambda: F) -> Self
    where
        F: Fn(&[Option<SignalEnvelope>], &ParamTable, &RunSettings) -> anyhow::Result<TransformOutput>
            + Send
            + Sync
            + 'static,
    {
        self.lambda = TransformLambda::new(lambda);
        self
    }
}

impl TransformLib {
    pub fn add(&mut self, def: TransformDef) -> Result<(), TransformLibError> {
        match self.defs.entry(def.id) {
            Entry::Occupied(_) => Err(TransformLibError::Duplicate {
                id: def.id,
                name: def.name,
            }),
            Entry::Vacant(entry) => {
                entry.insert(def);
                Ok(())
            }
        }
    }

    pub fn merge(&mut self, other: TransformLib) -> Result<(), TransformLibError> {
        for (_id, def) in other.defs {
            self.add(def)?;
        }
        Ok(())
    }

    pub fn by_id(&self, id: &TransformId) -> Option<&TransformDef> {
        self.defs.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&TransformDef> {
        self.defs.values().find(|def| def.name == name)
    }

    pub fn iter(&self) -> Values<'_, TransformId, TransformDef> {
        self.defs.values()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SweepConfig;

    #[test]
    fn duplicate_registration_is_rejected() {
        let def = TransformDef::new("noop", "test");
        let mut lib = TransformLib::default();

        lib.add(def.clone()).unwrap();
        assert_eq!(
            lib.add(def.clone()),
            Err(TransformLibError::Duplicate {
                id: def.id,
                name: "noop".to_string()
            })
        );
        assert_eq!(lib.len(), 1);
        assert!(lib.by_name("noop").is_some());
    }

    #[test]
    fn missing_lambda_is_an_error() {
        let settings = SweepConfig::default().run_settings(1);
        let result = TransformLambda::None.invoke(&[], &ParamTable::default(), &settings);

        assert!(result.is_err());
    }
}
