mod cli_tests;
mod hijack_tests;
