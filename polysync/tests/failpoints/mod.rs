mod fault_test;
