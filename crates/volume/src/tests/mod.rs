mod compact_tests;
mod helpers;
