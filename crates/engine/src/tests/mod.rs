mod helpers;

mod write_tests;
