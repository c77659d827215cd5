use ustr::Ustr;

use crate::address::Address;

/// Host-loader resolution for a guest address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// Name of the enclosing symbol, when the address falls inside one.
    pub name: Option<Ustr>,
    /// Base address of the enclosing symbol.
    pub base: Address,
    /// Path of the object file hosting the address.
    pub module: Option<Ustr>,
}

/// Address-to-symbol introspection, usually backed by the host dynamic
/// loader. The caller serializes access.
pub trait SymbolResolver {
    fn resolve(&self, address: Address) -> Option<ResolvedSymbol>;
}

/// Resolver for platforms without dynamic-loader introspection; the symbol
/// facet of every analysis stays empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn resolve(&self, _address: Address) -> Option<ResolvedSymbol> {
        None
    }
}
