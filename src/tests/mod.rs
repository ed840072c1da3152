mod mix_selftest;
