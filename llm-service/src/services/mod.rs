//! Concrete provider services.

pub mod anthropic_service;
pub mod mock_service;
pub mod openai_service;
