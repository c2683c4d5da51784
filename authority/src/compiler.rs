//! Produce a [ContractArtifact] from program source.

use crate::Error;
use anchor_ledger::artifact::ContractArtifact;
use ethers::solc;
use serde::{Deserialize, Serialize};
use std::{
    future::Future,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Turns program source into an interface description and bytecode.
///
/// Any diagnostic reported by the compiler is fatal.
pub trait Compiler: Send + Sync {
    fn compile(&self) -> impl Future<Output = Result<ContractArtifact, Error>> + Send;
}

/// Compile Solidity with an external `solc` (resolved from `SOLC_PATH` or `PATH`).
#[derive(Clone, Debug)]
pub struct Solc {
    source: PathBuf,
    contract: String,
}

impl Solc {
    /// Compile `contract` out of the file at `source`.
    pub fn new(source: impl Into<PathBuf>, contract: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            contract: contract.into(),
        }
    }
}

fn compile_source(source: &Path, contract: &str) -> Result<ContractArtifact, Error> {
    let output = solc::Solc::default()
        .compile_source(source)
        .map_err(|err| Error::Compilation(err.to_string()))?;
    if output.has_error() {
        let diagnostics: Vec<String> = output
            .errors
            .iter()
            .filter(|diagnostic| diagnostic.severity.is_error())
            .map(|diagnostic| diagnostic.to_string())
            .collect();
        return Err(Error::Compilation(diagnostics.join("\n")));
    }
    for warning in &output.errors {
        debug!(%warning, "compiler diagnostic");
    }

    let (abi, bytecode, _) = output
        .find(contract)
        .ok_or_else(|| Error::Compilation(format!("contract {contract} not found")))?
        .into_parts_or_default();
    if bytecode.is_empty() {
        return Err(Error::Compilation(format!(
            "contract {contract} has no deployable bytecode"
        )));
    }
    Ok(ContractArtifact::new(abi, bytecode))
}

impl Compiler for Solc {
    async fn compile(&self) -> Result<ContractArtifact, Error> {
        let source = self.source.clone();
        let contract = self.contract.clone();
        let artifact = tokio::task::spawn_blocking(move || compile_source(&source, &contract))
            .await
            .map_err(|err| Error::Compilation(err.to_string()))??;
        info!(
            source = ?self.source,
            contract = self.contract.as_str(),
            size = artifact.bytecode.len(),
            "compiled contract"
        );
        Ok(artifact)
    }
}

/// An artifact that was compiled ahead of time.
#[derive(Clone, Debug)]
pub enum Precompiled {
    /// JSON file containing `abi` and `bytecode`.
    File(PathBuf),
    /// Artifact already in memory.
    Artifact(ContractArtifact),
}

impl Compiler for Precompiled {
    async fn compile(&self) -> Result<ContractArtifact, Error> {
        match self {
            Precompiled::File(path) => {
                let bytes = tokio::fs::read(path).await?;
                let artifact: ContractArtifact = serde_json::from_slice(&bytes)?;
                info!(?path, "loaded precompiled contract");
                Ok(artifact)
            }
            Precompiled::Artifact(artifact) => Ok(artifact.clone()),
        }
    }
}

/// Compiler selection as written in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Config {
    Solc { source: PathBuf, contract: String },
    Precompiled { artifact: PathBuf },
}

impl Default for Config {
    fn default() -> Self {
        Config::Solc {
            source: PathBuf::from("contracts/StringStore.sol"),
            contract: "StringStore".into(),
        }
    }
}

impl Compiler for Config {
    async fn compile(&self) -> Result<ContractArtifact, Error> {
        match self {
            Config::Solc { source, contract } => Solc::new(source, contract).compile().await,
            Config::Precompiled { artifact } => {
                Precompiled::File(artifact.clone()).compile().await
            }
        }
    }
}

/// Write `artifact` as pretty JSON to `path`, creating parent directories.
pub async fn persist(artifact: &ContractArtifact, path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(artifact)?;
    tokio::fs::write(path, json).await?;
    info!(?path, "persisted artifact");
    Ok(())
}
