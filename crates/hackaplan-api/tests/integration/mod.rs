mod api_tests;
mod common;
mod ws_tests;
