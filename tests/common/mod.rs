pub(crate) mod faulty_store;

pub(crate) mod logging;

pub(crate) mod poll;
