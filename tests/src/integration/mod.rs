//! Cross-node flows.

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod rpc;
#[cfg(test)]
mod streams;
