pub mod adapters;
pub mod app;
pub mod bins;
pub mod catalog;
pub mod config;
pub mod error;
pub mod evt_index;
pub mod fixflag;
pub mod formats;
pub mod lightcurve;
pub mod manifest;
pub mod notify;
pub mod options;
pub mod output;
pub mod schema;
pub mod selection;
pub mod source;
pub mod store;
pub mod timeconv;
pub mod tool;
