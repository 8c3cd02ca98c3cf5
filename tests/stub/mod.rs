mod actions_test;
mod control_test;
mod https_test;
mod matching_test;
mod supervisor_test;
