pub(crate) mod access;
