// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Business domain identifiers
//!
//! This module provides type-safe identifiers for the business domains the
//! gateway fronts, along with the path prefix each domain is mounted under.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Business domains exposed under `/api`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// Patient records, appointments and provider integrations
    Healthcare,
    /// Courses, enrollments and training sessions
    Training,
    /// Dispute intake and arbitration case management
    Arbiter,
    /// Contacts, pipelines and customer relationships
    Crm,
    /// Invoicing, ledgers and payment integrations
    Financial,
    /// Assistant and model-backed automation
    Ai,
    /// Aggregated tenant dashboard
    Dashboard,
}

impl Domain {
    /// Returns the URL slug of the domain
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Healthcare => "healthcare",
            Self::Training => "training",
            Self::Arbiter => "arbiter",
            Self::Crm => "crm",
            Self::Financial => "financial",
            Self::Ai => "ai",
            Self::Dashboard => "dashboard",
        }
    }

    /// Returns the human-readable name of the domain
    pub const fn name(self) -> &'static str {
        match self {
            Self::Healthcare => "Healthcare",
            Self::Training => "Training",
            Self::Arbiter => "Arbiter",
            Self::Crm => "CRM",
            Self::Financial => "Financial",
            Self::Ai => "AI",
            Self::Dashboard => "Dashboard",
        }
    }

    /// Returns the path prefix the domain is mounted under
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Healthcare => "/api/healthcare",
            Self::Training => "/api/training",
            Self::Arbiter => "/api/arbiter",
            Self::Crm => "/api/crm",
            Self::Financial => "/api/financial",
            Self::Ai => "/api/ai",
            Self::Dashboard => "/api/dashboard",
        }
    }

    /// Returns all domains in mount order
    pub const fn all() -> &'static [Self] {
        &[
            Self::Healthcare,
            Self::Training,
            Self::Arbiter,
            Self::Crm,
            Self::Financial,
            Self::Ai,
            Self::Dashboard,
        ]
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Domain {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthcare" => Ok(Self::Healthcare),
            "training" => Ok(Self::Training),
            "arbiter" | "arbitration" => Ok(Self::Arbiter),
            "crm" => Ok(Self::Crm),
            "financial" | "finance" => Ok(Self::Financial),
            "ai" => Ok(Self::Ai),
            "dashboard" => Ok(Self::Dashboard),
            _ => Err(DomainParseError::UnknownDomain(s.to_string())),
        }
    }
}

impl Serialize for Domain {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.slug())
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_str(&value).map_err(serde::de::Error::custom)
    }
}

/// Error type for domain parsing
#[derive(Debug, thiserror::Error)]
pub enum DomainParseError {
    /// Unknown domain slug
    #[error(
        "unknown domain: {0}. Known domains are: healthcare, training, arbiter, crm, financial, ai, dashboard"
    )]
    UnknownDomain(String),
}
