// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Driver Registry (§4.1 component A): a process-wide mapping from `storage_type` to a record
//! describing how to build, validate, and project the config of that backend type.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::capability::Capability;
use crate::contract::Driver;
use crate::enforcer::EnforcedDriver;
use crate::error::{ContractDetails, StorageError};

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    String,
    Boolean,
    Number,
    Enum,
    Secret,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    Url,
    AbsPath,
    OctalPermission,
}

/// One recognized option in a backend type's `config_json` (§4.1 Registry, §6 Validation
/// rules).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOption {
    pub name: String,
    pub option_type: OptionType,
    pub default_value: Option<Value>,
    pub required: bool,
    pub required_on_create: bool,
    pub required_when: Option<String>,
    pub enum_values: Option<Vec<String>>,
    pub validation_rule: Option<ValidationRule>,
}

impl ConfigOption {
    pub fn new(name: impl Into<String>, option_type: OptionType) -> Self {
        ConfigOption {
            name: name.into(),
            option_type,
            default_value: None,
            required: false,
            required_on_create: false,
            required_when: None,
            enum_values: None,
            validation_rule: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation_rule = Some(rule);
        self
    }

    pub fn with_enum_values(mut self, values: &[&str]) -> Self {
        self.option_type = OptionType::Enum;
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Apply this option's validation rule to a value pulled out of `config_json`. Implements
    /// the §6 rules: URL fields require `http(s)://`; `abs_path` requires a platform-absolute
    /// path; enums must match the declared value set; `default_folder` must not contain `..`
    /// segments.
    pub fn validate_value(&self, value: &Value) -> Result<(), String> {
        match self.option_type {
            OptionType::Enum => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("`{}` must be a string", self.name))?;
                if let Some(allowed) = &self.enum_values {
                    if !allowed.iter().any(|v| v == s) {
                        return Err(format!(
                            "`{}` must be one of {:?}, got `{s}`",
                            self.name, allowed
                        ));
                    }
                }
            }
            OptionType::Boolean => {
                if !value.is_boolean() && !matches!(value.as_u64(), Some(0) | Some(1)) {
                    return Err(format!("`{}` must be a boolean", self.name));
                }
            }
            OptionType::Number => {
                if !value.is_number() {
                    return Err(format!("`{}` must be a number", self.name));
                }
            }
            OptionType::String | OptionType::Secret => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("`{}` must be a string", self.name))?;
                if self.name == "default_folder" && s.split('/').any(|seg| seg == "..") {
                    return Err("`default_folder` must not contain `..` segments".to_owned());
                }
            }
        }

        if let Some(rule) = self.validation_rule {
            let s = value.as_str().unwrap_or_default();
            match rule {
                ValidationRule::Url => {
                    if !(s.starts_with("http://") || s.starts_with("https://")) {
                        return Err(format!("`{}` must be an http(s):// URL", self.name));
                    }
                }
                ValidationRule::AbsPath => {
                    if !s.starts_with('/') {
                        return Err(format!("`{}` must be an absolute path", self.name));
                    }
                }
                ValidationRule::OctalPermission => {
                    if !s.chars().all(|c| ('0'..='7').contains(&c)) || s.is_empty() {
                        return Err(format!("`{}` must be an octal permission", self.name));
                    }
                }
            }
        }

        Ok(())
    }
}

pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

type Constructor = dyn Fn(&Value) -> Result<Arc<dyn Driver>, StorageError> + Send + Sync;
type Validator = dyn Fn(&Value) -> ValidationResult + Send + Sync;
type ConfigProjector = dyn Fn(&Value, bool) -> Value + Send + Sync;

/// A single registration record: everything the registry needs to build, validate, and
/// describe one backend type, without the registry itself knowing anything about that type.
pub struct DriverRegistration {
    pub storage_type: String,
    pub display_name: String,
    pub capabilities: Vec<Capability>,
    pub config_schema: Vec<ConfigOption>,
    pub provider_options: Vec<ConfigOption>,
    pub posix_only: bool,
    constructor: Box<Constructor>,
    validator: Box<Validator>,
    projector: Box<ConfigProjector>,
}

impl DriverRegistration {
    pub fn new(
        storage_type: impl Into<String>,
        display_name: impl Into<String>,
        capabilities: Vec<Capability>,
        config_schema: Vec<ConfigOption>,
        constructor: impl Fn(&Value) -> Result<Arc<dyn Driver>, StorageError> + Send + Sync + 'static,
    ) -> Self {
        let schema_for_validate = config_schema.clone();
        DriverRegistration {
            storage_type: storage_type.into(),
            display_name: display_name.into(),
            capabilities,
            config_schema,
            provider_options: Vec::new(),
            posix_only: false,
            constructor: Box::new(constructor),
            validator: Box::new(move |config| {
                let mut errors = Vec::new();
                for option in &schema_for_validate {
                    match config.get(&option.name) {
                        Some(value) => {
                            if let Err(err) = option.validate_value(value) {
                                errors.push(err);
                            }
                        }
                        None if option.required => {
                            errors.push(format!("missing required option `{}`", option.name));
                        }
                        None => {}
                    }
                }
                ValidationResult {
                    valid: errors.is_empty(),
                    errors,
                }
            }),
            projector: Box::new(|config, with_secrets| {
                let mut projected = config.clone();
                if !with_secrets {
                    if let Some(obj) = projected.as_object_mut() {
                        obj.retain(|key, _| !key.to_lowercase().contains("secret"));
                    }
                }
                projected
            }),
        }
    }

    pub fn posix_only(mut self) -> Self {
        self.posix_only = true;
        self
    }

    pub fn with_provider_options(mut self, options: Vec<ConfigOption>) -> Self {
        self.provider_options = options;
        self
    }
}

/// Registry (§4.1): the process-wide map from `storage_type` to its registration, plus the
/// `create_driver` flow that validates a fresh instance before handing it back wrapped in an
/// `Enforcer`.
#[derive(Default)]
pub struct DriverRegistry {
    registrations: RwLock<HashMap<String, DriverRegistration>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        DriverRegistry::default()
    }

    pub fn register(&self, registration: DriverRegistration) {
        self.registrations
            .write()
            .insert(registration.storage_type.clone(), registration);
    }

    /// §6: `LOCAL` (and any other `posix_only` registration) is hidden from the type list when
    /// not running on a POSIX/Node-style host.
    pub fn list_types(&self, is_posix_host: bool) -> Vec<StorageTypeDescriptor> {
        self.registrations
            .read()
            .values()
            .filter(|reg| is_posix_host || !reg.posix_only)
            .map(|reg| StorageTypeDescriptor {
                storage_type: reg.storage_type.clone(),
                display_name: reg.display_name.clone(),
                capabilities: reg.capabilities.clone(),
                config_schema: reg.config_schema.clone(),
                provider_options: reg.provider_options.clone(),
            })
            .collect()
    }

    pub fn validate_config(&self, storage_type: &str, config: &Value) -> Result<(), StorageError> {
        let registrations = self.registrations.read();
        let reg = registrations
            .get(storage_type)
            .ok_or_else(|| StorageError::validation(format!("unknown storage_type `{storage_type}`")))?;
        let result = (reg.validator)(config);
        if result.valid {
            Ok(())
        } else {
            Err(StorageError::validation(result.errors.join("; ")))
        }
    }

    pub fn project_config(&self, storage_type: &str, config: &Value, with_secrets: bool) -> Value {
        let registrations = self.registrations.read();
        match registrations.get(storage_type) {
            Some(reg) => (reg.projector)(config, with_secrets),
            None => config.clone(),
        }
    }

    /// `createDriver(type, config, secret)` (§4.1 Creation): look up the registration,
    /// instantiate, await `initialize()`, then verify `getType()` and that every method implied
    /// by the advertised ∩ registered capabilities is actually implemented. The returned driver
    /// is always wrapped by a transparent `Enforcer`.
    pub async fn create_driver(
        &self,
        storage_type: &str,
        config: &Value,
    ) -> Result<EnforcedDriver, StorageError> {
        let constructed = {
            let registrations = self.registrations.read();
            let reg = registrations.get(storage_type).ok_or_else(|| {
                StorageError::validation(format!("unknown storage_type `{storage_type}`"))
            })?;
            (reg.constructor)(config)?
        };

        constructed.initialize().await?;

        if constructed.get_type() != storage_type {
            return Err(StorageError::DriverContract {
                storage_type: storage_type.to_owned(),
                message: format!(
                    "driver reported type `{}`, expected `{storage_type}`",
                    constructed.get_type()
                ),
                details: ContractDetails::default(),
            });
        }

        let registered_capabilities: Vec<Capability> = {
            let registrations = self.registrations.read();
            registrations
                .get(storage_type)
                .map(|reg| reg.capabilities.clone())
                .unwrap_or_default()
        };

        let advertised = constructed.get_capabilities();
        let implemented = constructed.implemented_methods();
        let mut missing = Vec::new();
        for cap in advertised.iter().filter(|c| registered_capabilities.contains(c)) {
            for method in cap.required_methods() {
                if !implemented.contains(method) {
                    missing.push((*method).to_owned());
                }
            }
        }

        if !missing.is_empty() {
            return Err(StorageError::missing_methods(storage_type, missing));
        }

        Ok(EnforcedDriver::new(constructed))
    }
}

#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageTypeDescriptor {
    #[serde(rename = "type")]
    pub storage_type: String,
    pub display_name: String,
    pub capabilities: Vec<Capability>,
    pub config_schema: Vec<ConfigOption>,
    pub provider_options: Vec<ConfigOption>,
}
