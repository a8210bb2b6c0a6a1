mod concurrent_appends;
