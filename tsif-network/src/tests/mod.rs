mod provisioner_tests;
