pub mod fsm;
pub mod peer;
