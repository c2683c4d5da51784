//! Compiled program descriptors before and after deployment.
//!
//! A [ContractArtifact] is what compilation produces: an interface description and
//! the bytecode to deploy. Once the deployment receipt names an address, the
//! artifact becomes a [DeployedContract] and its bytecode is discarded. Only
//! [DeployedContract]s are ever handed to callers, so a descriptor without an
//! address cannot be observed outside the deployer.

use crate::Error;
use ethers::{
    abi::{
        token::{LenientTokenizer, Tokenizer},
        Abi, Token,
    },
    types::{Address, Bytes},
};
use serde::{Deserialize, Serialize};

/// Interface description and bytecode of a compiled program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractArtifact {
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// Create a new [ContractArtifact].
    pub fn new(abi: Abi, bytecode: Bytes) -> Self {
        Self { abi, bytecode }
    }

    /// Returns the creation payload: bytecode followed by the encoded
    /// constructor arguments.
    pub fn deploy_data(&self, args: &[Token]) -> Result<Bytes, Error> {
        match self.abi.constructor() {
            Some(constructor) => Ok(constructor
                .encode_input(self.bytecode.to_vec(), args)?
                .into()),
            None if args.is_empty() => Ok(self.bytecode.clone()),
            None => Err(Error::MissingConstructor),
        }
    }

    /// Attach the address reported by the deployment receipt, discarding the
    /// bytecode.
    pub fn deployed(self, address: Address) -> DeployedContract {
        DeployedContract {
            address,
            abi: self.abi,
        }
    }
}

/// A program that has been deployed at a known address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub address: Address,
    pub abi: Abi,
}

impl DeployedContract {
    /// ABI-encode a call to `method` with `args`.
    pub fn encode(&self, method: &str, args: &[Token]) -> Result<Bytes, Error> {
        let function = self.abi.function(method)?;
        Ok(function.encode_input(args)?.into())
    }

    /// ABI-decode the output of `method`.
    pub fn decode(&self, method: &str, output: &[u8]) -> Result<Vec<Token>, Error> {
        let function = self.abi.function(method)?;
        Ok(function.decode_output(output)?)
    }

    /// Parse textual arguments for `method` according to its declared input types.
    pub fn tokenize(&self, method: &str, args: &[String]) -> Result<Vec<Token>, Error> {
        let function = self.abi.function(method)?;
        if function.inputs.len() != args.len() {
            return Err(Error::Abi(ethers::abi::Error::InvalidData));
        }
        let mut tokens = Vec::with_capacity(args.len());
        for (param, arg) in function.inputs.iter().zip(args) {
            tokens.push(LenientTokenizer::tokenize(&param.kind, arg)?);
        }
        Ok(tokens)
    }
}
