mod part_tests;
