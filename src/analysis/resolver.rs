//! Call-site arity lookup for the stack analysis.
//!
//! Most opcodes have a fixed stack effect, recorded in the opcode tables. The call family
//! (`call`, `callvirt`, `calli`, `newobj`) and `ret` depend on method signatures, which live in
//! the metadata of the containing assembly. The analysis asks a [`SignatureResolver`] for them.

use std::collections::HashMap;

use crate::{assembly::OpCode, token::Token, Error, Result};

/// The stack-relevant shape of a method signature at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallSite {
    /// Number of declared parameters, `this` excluded
    pub parameters: u32,
    /// The callee takes an instance pointer
    pub has_this: bool,
    /// The callee returns something other than `void`
    pub returns_value: bool,
}

impl CallSite {
    /// Creates a call site description.
    #[must_use]
    pub const fn new(parameters: u32, has_this: bool, returns_value: bool) -> Self {
        CallSite {
            parameters,
            has_this,
            returns_value,
        }
    }

    /// Values `opcode` pops when calling a method of this shape.
    ///
    /// `newobj` creates the instance itself, so it pops the parameters only; `calli` also pops
    /// the function pointer.
    #[must_use]
    pub fn pops(&self, opcode: OpCode) -> u32 {
        let this = u32::from(self.has_this);
        match opcode {
            OpCode::NEWOBJ => self.parameters,
            OpCode::CALLI => self.parameters + this + 1,
            _ => self.parameters + this,
        }
    }

    /// Values `opcode` pushes when calling a method of this shape.
    #[must_use]
    pub fn pushes(&self, opcode: OpCode) -> u32 {
        match opcode {
            OpCode::NEWOBJ => 1,
            _ => u32::from(self.returns_value),
        }
    }
}

/// Supplies signature arities to the stack analysis.
///
/// Implementations are shared across the worker threads of a batch, so they must be `Sync`.
pub trait SignatureResolver: Sync {
    /// The call site shape for a call-family instruction referencing `token`.
    ///
    /// For `calli`, `token` is a stand-alone signature; for the other opcodes it is a method
    /// definition, reference or specification.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TokenNotFound`] if the token can not be resolved.
    fn call_site(&self, opcode: OpCode, token: Token) -> Result<CallSite>;

    /// Returns true if the analysed method itself returns a value, which `ret` pops.
    fn returns_value(&self) -> bool;
}

/// A [`SignatureResolver`] backed by a plain map.
///
/// # Examples
///
/// ```rust
/// use ciltree::analysis::{CallSite, SignatureResolver, SignatureTable};
/// use ciltree::assembly::OpCode;
/// use ciltree::token::Token;
///
/// let mut table = SignatureTable::new(true);
/// table.insert(Token::new(0x0A00_0001), CallSite::new(2, false, true));
///
/// let site = table.call_site(OpCode::CALL, Token::new(0x0A00_0001))?;
/// assert_eq!(site.pops(OpCode::CALL), 2);
/// assert!(table.call_site(OpCode::CALL, Token::new(0x0A00_0002)).is_err());
/// # Ok::<(), ciltree::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    sites: HashMap<Token, CallSite>,
    returns_value: bool,
}

impl SignatureTable {
    /// Creates an empty table for a method that does (`true`) or does not return a value.
    #[must_use]
    pub fn new(returns_value: bool) -> Self {
        SignatureTable {
            sites: HashMap::new(),
            returns_value,
        }
    }

    /// Registers the shape of the method referenced by `token`, replacing a previous entry.
    pub fn insert(&mut self, token: Token, site: CallSite) -> Option<CallSite> {
        self.sites.insert(token, site)
    }

    /// Builder-style variant of [`SignatureTable::insert`].
    #[must_use]
    pub fn with(mut self, token: Token, site: CallSite) -> Self {
        self.sites.insert(token, site);
        self
    }

    /// Number of registered tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Returns true if no token is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

impl SignatureResolver for SignatureTable {
    fn call_site(&self, _opcode: OpCode, token: Token) -> Result<CallSite> {
        self.sites
            .get(&token)
            .copied()
            .ok_or(Error::TokenNotFound(token))
    }

    fn returns_value(&self) -> bool {
        self.returns_value
    }
}
