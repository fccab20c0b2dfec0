pub mod autocorrelation;
pub mod commands;
pub mod confidence;
pub mod config;
pub mod context;
pub mod database;
pub mod errors;
pub mod feature_applicator;
pub mod gbdt;
pub mod lag_features;
pub mod linear;
pub mod metrics;
pub mod model_selection;
pub mod models;
pub mod param_utils;
pub mod regressor;
pub mod reporter;
pub mod storage;
pub mod training;
pub mod validation;
