mod helpers;
mod middleware;
